//! Trait definitions for the engine module.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::error::EngineError;
use super::types::{
    AlgebraJob, BoundaryConversionJob, ByteConversionJob, ClipJob, MergeJob, RankFilterJob,
    RasterInfo, ResamplingFilterJob, ResamplingOutputs, RescaleJob, SlopeJob, TranslateJob,
    VectorInfo, ZonalStatsJob, ZonalStatsResult,
};

/// A provider of the raster and vector operations the pipeline sequences.
///
/// Every operation overwrites its output if one is already present and
/// returns the path it wrote.
#[async_trait]
pub trait RasterEngine: Send + Sync {
    /// Returns the name of this engine implementation.
    fn name(&self) -> &str;

    /// Validates that the engine is properly configured and ready.
    async fn validate(&self) -> Result<(), EngineError>;

    /// Reads size, bands and no-data of a raster.
    async fn probe_raster(&self, path: &Path) -> Result<RasterInfo, EngineError>;

    /// Reads the layer and feature count of a vector dataset.
    async fn probe_vector(&self, path: &Path) -> Result<VectorInfo, EngineError>;

    /// Converts a CAD boundary into a polygon mask in the run CRS.
    async fn convert_boundary(&self, job: BoundaryConversionJob) -> Result<PathBuf, EngineError>;

    /// Clips a raster by a polygon mask.
    async fn clip_by_mask(&self, job: ClipJob) -> Result<PathBuf, EngineError>;

    /// Computes the median of a band over the mask and writes the statistics layer.
    async fn zonal_median(&self, job: ZonalStatsJob) -> Result<ZonalStatsResult, EngineError>;

    /// Evaluates a raster expression.
    async fn raster_algebra(&self, job: AlgebraJob) -> Result<PathBuf, EngineError>;

    async fn rank_filter(&self, job: RankFilterJob) -> Result<PathBuf, EngineError>;

    async fn resampling_filter(
        &self,
        job: ResamplingFilterJob,
    ) -> Result<ResamplingOutputs, EngineError>;

    async fn translate(&self, job: TranslateJob) -> Result<PathBuf, EngineError>;

    /// Linearly rescales a band from its own min/max into the target range.
    async fn rescale(&self, job: RescaleJob) -> Result<PathBuf, EngineError>;

    /// Converts to 8-bit; source no-data becomes the sentinel.
    async fn to_byte(&self, job: ByteConversionJob) -> Result<PathBuf, EngineError>;

    async fn slope(&self, job: SlopeJob) -> Result<PathBuf, EngineError>;

    /// Stacks inputs into one raster, preserving input order as band order.
    async fn merge(&self, job: MergeJob) -> Result<PathBuf, EngineError>;
}
