//! In-memory layer registry for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::artifact::Artifact;
use crate::registry::{LayerRegistry, RegisteredLayer, RegistryError};

/// Registry keeping layers in memory.
///
/// Clones share the same layer list, so a test can hand one clone to the
/// runner and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    layers: Arc<RwLock<Vec<RegisteredLayer>>>,
    /// When set, every registration fails.
    failing: Arc<RwLock<bool>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display names in registration order.
    pub async fn names(&self) -> Vec<String> {
        self.layers
            .read()
            .await
            .iter()
            .map(|layer| layer.name.clone())
            .collect()
    }

    /// Whether a layer with this display name is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.layers.read().await.iter().any(|layer| layer.name == name)
    }

    /// Make every registration fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }
}

#[async_trait]
impl LayerRegistry for MemoryRegistry {
    fn name(&self) -> &str {
        "memory"
    }

    async fn register(&self, artifact: &Artifact, display_name: &str) -> Result<(), RegistryError> {
        if *self.failing.read().await {
            return Err(RegistryError::Io {
                path: artifact.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "registry unavailable"),
            });
        }

        let mut layers = self.layers.write().await;
        layers.retain(|layer| layer.path != artifact.path);
        layers.push(RegisteredLayer::new(artifact, display_name));
        Ok(())
    }

    async fn clear(&self) -> Result<(), RegistryError> {
        self.layers.write().await.clear();
        Ok(())
    }

    async fn layers(&self) -> Vec<RegisteredLayer> {
        self.layers.read().await.clone()
    }
}
