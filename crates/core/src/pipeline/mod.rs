//! Pipeline module for the raster derivation run.
//!
//! This module provides the `PipelineRunner` which executes the fixed stage
//! sequence:
//! - Preparation: boundary conversion, DEM clip, zonal median, normalization
//! - Filtering: rank filter and resampling filter, each converted to GeoTIFF
//! - Derivation: rescaled 8-bit elevation and 8-bit slope
//! - Composite: RGB and thermal band selection, merged into `result.tif`
//!
//! Stages run one at a time. A failed stage is recorded and only its
//! dependants are skipped, unless the error policy aborts the run.
//!
//! # Example
//!
//! ```ignore
//! use strecha_core::{Config, GdalEngine, PipelineRunner, RunInputs};
//!
//! let config = Config::default();
//! let engine = GdalEngine::new(config.engine.clone());
//! let runner = PipelineRunner::new(&config, engine)?;
//!
//! let inputs = RunInputs::new("obvod.dxf", "dem.tif")
//!     .with_orthophoto("ortofoto.tif")
//!     .with_thermal("tir.tif");
//!
//! let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(100);
//! let runner = runner.with_progress(progress_tx);
//! let result = runner.run(&inputs, "out".as_ref()).await?;
//!
//! for stage in result.failed_stages() {
//!     println!("{} failed", stage);
//! }
//! ```

mod config;
mod definition;
mod error;
mod runner;
mod types;

pub use config::{
    CompositeBranches, DemBranchSource, ErrorPolicy, PipelineConfig, PipelineVariant,
    RankFilterConfig, ResamplingFilterConfig, RescaleRange, StatisticPolicy,
};
pub use definition::PipelineDefinition;
pub use error::{DefinitionError, PipelineError, StageError};
pub use runner::PipelineRunner;
pub use types::{
    PipelineProgress, RunInputs, RunResult, SkipReason, StageId, StageOutcome, StageReport,
    StageStatus, ZonalStatistic,
};
