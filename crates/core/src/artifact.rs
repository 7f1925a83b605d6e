//! Artifacts produced by the pipeline and the fixed file-name table they live in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What kind of dataset an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Georeferenced grid.
    Raster,
    /// Polygon mask.
    Vector,
    /// Attribute layer holding a zonal statistic.
    Table,
}

/// A file produced (or consumed) by a pipeline stage. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Short name, e.g. `clipped_dem`.
    pub name: String,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn raster(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: ArtifactKind::Raster,
        }
    }

    pub fn vector(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: ArtifactKind::Vector,
        }
    }

    pub fn table(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: ArtifactKind::Table,
        }
    }

    /// Whether the backing file is present on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Fixed artifact names inside a run's output directory.
///
/// Re-running into the same directory overwrites these files.
#[derive(Debug, Clone)]
pub struct ArtifactTable {
    root: PathBuf,
}

impl ArtifactTable {
    pub const MASK: &'static str = "obvod.shp";
    pub const CLIPPED_DEM: &'static str = "clipped_dem.tif";
    pub const STATS: &'static str = "stats.gpkg";
    pub const NORMALIZED_DEM: &'static str = "normalized_dem.tif";
    pub const RANK_FILTERED: &'static str = "filtered_dem_rank.sdat";
    pub const RANK_FILTERED_TIFF: &'static str = "filtered_dem_rank.tif";
    pub const RESCALED_DEM: &'static str = "rescaled_dem.tif";
    pub const DEM_8BIT: &'static str = "dem_8bit.tif";
    pub const HIPASS: &'static str = "filtered_dem_hipass.sdat";
    pub const HIPASS_TIFF: &'static str = "filtered_dem_hipass.tif";
    pub const LOPASS: &'static str = "filtered_dem_lopass.sdat";
    pub const SLOPE: &'static str = "slope.tif";
    pub const SLOPE_8BIT: &'static str = "slope_8bit.tif";
    pub const THERMAL_BAND: &'static str = "tir_r.tif";
    pub const RGB: &'static str = "ortofoto_rgb.tif";
    pub const RESULT: &'static str = "result.tif";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn mask(&self) -> Artifact {
        Artifact::vector("mask", self.path(Self::MASK))
    }

    pub fn clipped_dem(&self) -> Artifact {
        Artifact::raster("clipped_dem", self.path(Self::CLIPPED_DEM))
    }

    pub fn stats(&self) -> Artifact {
        Artifact::table("stats", self.path(Self::STATS))
    }

    pub fn normalized_dem(&self) -> Artifact {
        Artifact::raster("normalized_dem", self.path(Self::NORMALIZED_DEM))
    }

    pub fn rank_filtered(&self) -> Artifact {
        Artifact::raster("filtered_dem_rank", self.path(Self::RANK_FILTERED))
    }

    pub fn rank_filtered_tiff(&self) -> Artifact {
        Artifact::raster("filtered_dem_rank_tiff", self.path(Self::RANK_FILTERED_TIFF))
    }

    pub fn rescaled_dem(&self) -> Artifact {
        Artifact::raster("rescaled_dem", self.path(Self::RESCALED_DEM))
    }

    pub fn dem_8bit(&self) -> Artifact {
        Artifact::raster("dem_8bit", self.path(Self::DEM_8BIT))
    }

    pub fn hipass(&self) -> Artifact {
        Artifact::raster("filtered_dem_hipass", self.path(Self::HIPASS))
    }

    pub fn hipass_tiff(&self) -> Artifact {
        Artifact::raster("filtered_dem_hipass_tiff", self.path(Self::HIPASS_TIFF))
    }

    pub fn lopass(&self) -> Artifact {
        Artifact::raster("filtered_dem_lopass", self.path(Self::LOPASS))
    }

    pub fn slope(&self) -> Artifact {
        Artifact::raster("slope", self.path(Self::SLOPE))
    }

    pub fn slope_8bit(&self) -> Artifact {
        Artifact::raster("slope_8bit", self.path(Self::SLOPE_8BIT))
    }

    pub fn thermal_band(&self) -> Artifact {
        Artifact::raster("tir_r", self.path(Self::THERMAL_BAND))
    }

    pub fn rgb(&self) -> Artifact {
        Artifact::raster("ortofoto_rgb", self.path(Self::RGB))
    }

    pub fn result(&self) -> Artifact {
        Artifact::raster("result", self.path(Self::RESULT))
    }

    /// Every file name the table can produce.
    pub fn file_names() -> [&'static str; 16] {
        [
            Self::MASK,
            Self::CLIPPED_DEM,
            Self::STATS,
            Self::NORMALIZED_DEM,
            Self::RANK_FILTERED,
            Self::RANK_FILTERED_TIFF,
            Self::RESCALED_DEM,
            Self::DEM_8BIT,
            Self::HIPASS,
            Self::HIPASS_TIFF,
            Self::LOPASS,
            Self::SLOPE,
            Self::SLOPE_8BIT,
            Self::THERMAL_BAND,
            Self::RGB,
            Self::RESULT,
        ]
    }
}
