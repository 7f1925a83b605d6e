//! Configuration for the engine module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the GDAL/SAGA command-line engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_gdal_translate")]
    pub gdal_translate_path: PathBuf,

    #[serde(default = "default_gdalwarp")]
    pub gdalwarp_path: PathBuf,

    #[serde(default = "default_gdalinfo")]
    pub gdalinfo_path: PathBuf,

    #[serde(default = "default_gdaldem")]
    pub gdaldem_path: PathBuf,

    #[serde(default = "default_gdal_calc")]
    pub gdal_calc_path: PathBuf,

    #[serde(default = "default_gdal_merge")]
    pub gdal_merge_path: PathBuf,

    #[serde(default = "default_ogr2ogr")]
    pub ogr2ogr_path: PathBuf,

    #[serde(default = "default_ogrinfo")]
    pub ogrinfo_path: PathBuf,

    #[serde(default = "default_saga_cmd")]
    pub saga_cmd_path: PathBuf,

    /// SAGA library holding the filters.
    #[serde(default = "default_saga_filter_library")]
    pub saga_filter_library: String,

    /// Tool id of "Rank Filter" in the filter library.
    #[serde(default = "default_rank_filter_tool")]
    pub rank_filter_tool: String,

    /// Tool id of "Resampling Filter" in the filter library.
    #[serde(default = "default_resampling_filter_tool")]
    pub resampling_filter_tool: String,

    /// Timeout for a single external call in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_gdal_translate() -> PathBuf {
    PathBuf::from("gdal_translate")
}

fn default_gdalwarp() -> PathBuf {
    PathBuf::from("gdalwarp")
}

fn default_gdalinfo() -> PathBuf {
    PathBuf::from("gdalinfo")
}

fn default_gdaldem() -> PathBuf {
    PathBuf::from("gdaldem")
}

fn default_gdal_calc() -> PathBuf {
    PathBuf::from("gdal_calc.py")
}

fn default_gdal_merge() -> PathBuf {
    PathBuf::from("gdal_merge.py")
}

fn default_ogr2ogr() -> PathBuf {
    PathBuf::from("ogr2ogr")
}

fn default_ogrinfo() -> PathBuf {
    PathBuf::from("ogrinfo")
}

fn default_saga_cmd() -> PathBuf {
    PathBuf::from("saga_cmd")
}

fn default_saga_filter_library() -> String {
    "grid_filter".to_string()
}

fn default_rank_filter_tool() -> String {
    "9".to_string()
}

fn default_resampling_filter_tool() -> String {
    "11".to_string()
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gdal_translate_path: default_gdal_translate(),
            gdalwarp_path: default_gdalwarp(),
            gdalinfo_path: default_gdalinfo(),
            gdaldem_path: default_gdaldem(),
            gdal_calc_path: default_gdal_calc(),
            gdal_merge_path: default_gdal_merge(),
            ogr2ogr_path: default_ogr2ogr(),
            ogrinfo_path: default_ogrinfo(),
            saga_cmd_path: default_saga_cmd(),
            saga_filter_library: default_saga_filter_library(),
            rank_filter_tool: default_rank_filter_tool(),
            resampling_filter_tool: default_resampling_filter_tool(),
            timeout_secs: default_timeout(),
        }
    }
}

impl EngineConfig {
    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Sets the `saga_cmd` binary.
    pub fn with_saga_cmd(mut self, path: PathBuf) -> Self {
        self.saga_cmd_path = path;
        self
    }

    /// Every external tool the engine may invoke.
    pub fn tool_paths(&self) -> Vec<&PathBuf> {
        vec![
            &self.gdal_translate_path,
            &self.gdalwarp_path,
            &self.gdalinfo_path,
            &self.gdaldem_path,
            &self.gdal_calc_path,
            &self.gdal_merge_path,
            &self.ogr2ogr_path,
            &self.ogrinfo_path,
            &self.saga_cmd_path,
        ]
    }
}
