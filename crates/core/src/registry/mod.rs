//! Layer registry: where produced artifacts are announced under their
//! display names once they validate.
//!
//! `ManifestRegistry` keeps a `layers.json` session manifest next to the
//! artifacts so a viewer can load the same set of layers the run produced.

mod manifest;

pub use manifest::ManifestRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind};

/// Errors from a layer registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Manifest I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A layer as it was registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredLayer {
    pub name: String,
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredLayer {
    pub fn new(artifact: &Artifact, display_name: &str) -> Self {
        Self {
            name: display_name.to_string(),
            path: artifact.path.clone(),
            kind: artifact.kind,
            registered_at: Utc::now(),
        }
    }
}

/// A sink for display layers.
#[async_trait]
pub trait LayerRegistry: Send + Sync {
    /// Returns the name of this registry implementation.
    fn name(&self) -> &str;

    /// Registers an artifact under a display name.
    ///
    /// Registering the same path again replaces the earlier entry.
    async fn register(&self, artifact: &Artifact, display_name: &str) -> Result<(), RegistryError>;

    /// Removes every registered layer.
    async fn clear(&self) -> Result<(), RegistryError>;

    /// Layers in registration order.
    async fn layers(&self) -> Vec<RegisteredLayer>;
}

/// Registry that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

#[async_trait]
impl LayerRegistry for NoopRegistry {
    fn name(&self) -> &str {
        "noop"
    }

    async fn register(&self, _artifact: &Artifact, _display_name: &str) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn layers(&self) -> Vec<RegisteredLayer> {
        Vec::new()
    }
}
