//! Manifest-backed layer registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::{LayerRegistry, RegisteredLayer, RegistryError};
use crate::artifact::Artifact;

#[derive(Serialize, Deserialize)]
struct Manifest {
    layers: Vec<RegisteredLayer>,
}

/// Registry persisting the registered layers as JSON.
///
/// Every change rewrites the whole manifest through a temp file and a rename,
/// so readers never see a partial file.
pub struct ManifestRegistry {
    path: PathBuf,
    layers: RwLock<Vec<RegisteredLayer>>,
}

impl ManifestRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            layers: RwLock::new(Vec::new()),
        }
    }

    /// Manifest location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a manifest written by an earlier session.
    pub async fn load(path: &Path) -> Result<Vec<RegisteredLayer>, RegistryError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let manifest: Manifest = serde_json::from_str(&text)?;
        Ok(manifest.layers)
    }

    async fn persist(&self, layers: &[RegisteredLayer]) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(&Manifest {
            layers: layers.to_vec(),
        })?;

        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl LayerRegistry for ManifestRegistry {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn register(&self, artifact: &Artifact, display_name: &str) -> Result<(), RegistryError> {
        let mut layers = self.layers.write().await;
        let layer = RegisteredLayer::new(artifact, display_name);
        match layers.iter_mut().find(|existing| existing.path == layer.path) {
            Some(existing) => *existing = layer,
            None => layers.push(layer),
        }
        self.persist(&layers).await?;
        debug!(name = display_name, path = %artifact.path.display(), "Registered layer");
        Ok(())
    }

    async fn clear(&self) -> Result<(), RegistryError> {
        let mut layers = self.layers.write().await;
        layers.clear();
        self.persist(&layers).await
    }

    async fn layers(&self) -> Vec<RegisteredLayer> {
        self.layers.read().await.clone()
    }
}
