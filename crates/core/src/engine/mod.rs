//! Raster engine module for the processing operations the pipeline sequences.
//!
//! This module provides the `RasterEngine` trait and a `GdalEngine`
//! implementation that drives the GDAL and SAGA command-line tools. Cell
//! values for the zonal median are read through the GDAL library.
//!
//! # Operations
//!
//! - Boundary conversion (DXF to polygon shapefile)
//! - Clip by mask, cropped to the cutline
//! - Zonal median over a mask
//! - Raster algebra from a structured expression
//! - Rank and resampling (low/high-pass) filters
//! - Translate (band selection, format and type conversion)
//! - Rescale, 8-bit conversion, slope and band-separate merge
//!
//! # Example
//!
//! ```ignore
//! use strecha_core::engine::{GdalEngine, RasterEngine, ClipJob};
//!
//! let engine = GdalEngine::with_defaults();
//! engine.validate().await?;
//!
//! let clipped = engine
//!     .clip_by_mask(ClipJob {
//!         input: PathBuf::from("dem.tif"),
//!         mask: PathBuf::from("out/obvod.shp"),
//!         output: PathBuf::from("out/clipped_dem.tif"),
//!         crs: "EPSG:5514".to_string(),
//!         crop_to_cutline: true,
//!         nodata: Some(-9999.0),
//!     })
//!     .await?;
//! let info = engine.probe_raster(&clipped).await?;
//! println!("{} x {} cells", info.width, info.height);
//! ```

mod config;
mod error;
mod gdal;
mod traits;
mod types;

pub use config::EngineConfig;
pub use error::EngineError;
pub use self::gdal::GdalEngine;
pub use traits::RasterEngine;
pub use types::{
    AlgebraJob, BandInfo, BoundaryConversionJob, ByteConversionJob, ClipJob, DataType,
    KernelShape, MergeJob, RankFilterJob, RasterBinding, RasterInfo, ResamplingFilterJob,
    ResamplingOutputs, RescaleJob, SlopeJob, TranslateJob, VectorInfo, ZonalStatsJob,
    ZonalStatsResult,
};
