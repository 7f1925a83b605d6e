//! Types for the engine module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::expression::RasterExpression;

/// Raster cell data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Returns the GDAL name for this data type.
    pub fn gdal_name(&self) -> &'static str {
        match self {
            Self::Byte => "Byte",
            Self::UInt16 => "UInt16",
            Self::Int16 => "Int16",
            Self::UInt32 => "UInt32",
            Self::Int32 => "Int32",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
        }
    }

    /// Parses a GDAL data type name.
    pub fn from_gdal_name(name: &str) -> Option<Self> {
        match name {
            "Byte" => Some(Self::Byte),
            "UInt16" => Some(Self::UInt16),
            "Int16" => Some(Self::Int16),
            "UInt32" => Some(Self::UInt32),
            "Int32" => Some(Self::Int32),
            "Float32" => Some(Self::Float32),
            "Float64" => Some(Self::Float64),
            _ => None,
        }
    }
}

/// Neighbourhood shape of the rank filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelShape {
    #[default]
    Square,
    Circle,
}

impl KernelShape {
    /// SAGA `KERNEL_TYPE` choice index.
    pub fn saga_index(&self) -> u8 {
        match self {
            Self::Square => 0,
            Self::Circle => 1,
        }
    }
}

/// Convert the boundary drawing into a polygon mask.
#[derive(Debug, Clone)]
pub struct BoundaryConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub crs: String,
    /// Drop features that cannot be converted instead of failing.
    pub skip_failures: bool,
}

/// Clip a raster to a polygon mask.
#[derive(Debug, Clone)]
pub struct ClipJob {
    pub input: PathBuf,
    pub mask: PathBuf,
    pub output: PathBuf,
    pub crs: String,
    /// Shrink the output extent to the mask's bounding box.
    pub crop_to_cutline: bool,
    /// Value written outside the mask.
    pub nodata: Option<f64>,
}

/// Median of a raster band over the mask polygons.
#[derive(Debug, Clone)]
pub struct ZonalStatsJob {
    pub raster: PathBuf,
    pub band: u32,
    pub zones: PathBuf,
    /// Statistics layer written next to the other artifacts.
    pub output: PathBuf,
    /// Prefix of the statistic column (`_` gives `_median`).
    pub column_prefix: String,
}

impl ZonalStatsJob {
    /// Name of the column holding the median.
    pub fn median_column(&self) -> String {
        format!("{}median", self.column_prefix)
    }
}

/// Result of a zonal statistics run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatsResult {
    /// Statistics layer.
    pub layer: PathBuf,
    /// Number of features in the statistics layer.
    pub feature_count: u64,
    /// Median read back from the layer, `None` if no feature carries one.
    pub median: Option<f64>,
}

/// Binds a calculator variable to one input raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBinding {
    pub name: char,
    pub path: PathBuf,
}

impl RasterBinding {
    pub fn new(name: char, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
        }
    }
}

/// Evaluate an expression cell by cell.
#[derive(Debug, Clone)]
pub struct AlgebraJob {
    pub inputs: Vec<RasterBinding>,
    pub expression: RasterExpression,
    pub output: PathBuf,
    pub output_type: DataType,
    pub nodata: Option<f64>,
}

/// SAGA rank filter.
#[derive(Debug, Clone)]
pub struct RankFilterJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub radius: u32,
    /// Rank in percent, 50 is the median.
    pub rank: f64,
    pub kernel: KernelShape,
}

/// SAGA resampling filter producing low-pass and high-pass outputs.
#[derive(Debug, Clone)]
pub struct ResamplingFilterJob {
    pub input: PathBuf,
    pub lopass: PathBuf,
    pub hipass: PathBuf,
    pub scale: f64,
}

/// Outputs of the resampling filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResamplingOutputs {
    pub lopass: PathBuf,
    pub hipass: PathBuf,
}

/// Band selection and format/type conversion.
#[derive(Debug, Clone, Default)]
pub struct TranslateJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// 1-based bands to keep, in output order. Empty keeps all.
    pub bands: Vec<u32>,
    pub output_type: Option<DataType>,
    pub nodata: Option<f64>,
    /// GDAL creation options, e.g. `COMPRESS=DEFLATE`.
    pub creation_options: Vec<String>,
}

/// Linear rescale of one band into `[out_min, out_max]`.
#[derive(Debug, Clone)]
pub struct RescaleJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub band: u32,
    pub out_min: f64,
    pub out_max: f64,
}

/// Conversion to 8-bit with a no-data sentinel.
#[derive(Debug, Clone)]
pub struct ByteConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub nodata: u8,
}

/// Terrain slope in degrees.
#[derive(Debug, Clone)]
pub struct SlopeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub band: u32,
}

/// Stack rasters into one multi-band raster.
#[derive(Debug, Clone)]
pub struct MergeJob {
    /// Band order of the output follows this order.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Each input becomes its own band.
    pub separate: bool,
    pub output_type: DataType,
}

/// Per-band information of a raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    pub index: u32,
    pub data_type: Option<DataType>,
    pub nodata: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

/// Information about a raster dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub path: PathBuf,
    pub width: u64,
    pub height: u64,
    pub bands: Vec<BandInfo>,
    /// WKT of the coordinate system, if the dataset has one.
    pub crs_wkt: Option<String>,
}

impl RasterInfo {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Whether the raster has at least one cell and one band.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.bands.is_empty()
    }

    pub fn band(&self, index: u32) -> Option<&BandInfo> {
        self.bands.iter().find(|band| band.index == index)
    }
}

/// Information about a vector dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorInfo {
    pub path: PathBuf,
    pub layer_name: Option<String>,
    pub feature_count: u64,
    pub geometry_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_names() {
        for data_type in [
            DataType::Byte,
            DataType::UInt16,
            DataType::Int16,
            DataType::UInt32,
            DataType::Int32,
            DataType::Float32,
            DataType::Float64,
        ] {
            assert_eq!(DataType::from_gdal_name(data_type.gdal_name()), Some(data_type));
        }
        assert_eq!(DataType::from_gdal_name("CFloat32"), None);
    }

    #[test]
    fn test_kernel_shape() {
        assert_eq!(KernelShape::default(), KernelShape::Square);
        assert_eq!(KernelShape::Square.saga_index(), 0);
        assert_eq!(KernelShape::Circle.saga_index(), 1);
    }

    #[test]
    fn test_median_column() {
        let job = ZonalStatsJob {
            raster: PathBuf::from("clipped_dem.tif"),
            band: 1,
            zones: PathBuf::from("obvod.shp"),
            output: PathBuf::from("stats.gpkg"),
            column_prefix: "_".to_string(),
        };
        assert_eq!(job.median_column(), "_median");
    }

    #[test]
    fn test_raster_info_empty() {
        let info = RasterInfo {
            path: PathBuf::from("x.tif"),
            width: 10,
            height: 0,
            bands: vec![],
            crs_wkt: None,
        };
        assert!(info.is_empty());
        assert_eq!(info.band_count(), 0);
        assert!(info.band(1).is_none());
    }
}
