use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::EngineConfig;
use crate::pipeline::PipelineConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Coordinate reference system shared by the mask and every clipped raster.
    #[serde(default = "default_crs")]
    pub crs: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crs: default_crs(),
            engine: EngineConfig::default(),
            pipeline: PipelineConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

fn default_crs() -> String {
    // S-JTSK / Krovak East North
    "EPSG:5514".to_string()
}

/// Layer registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    /// File name of the manifest, relative to the output directory.
    #[serde(default = "default_manifest_name")]
    pub manifest_name: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            manifest_name: default_manifest_name(),
        }
    }
}

fn default_manifest_name() -> PathBuf {
    PathBuf::from("layers.json")
}

/// Where successfully produced layers get registered.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// Session manifest written next to the artifacts.
    #[default]
    Manifest,
    /// Registration is discarded.
    None,
}
