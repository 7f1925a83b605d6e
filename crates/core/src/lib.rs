//! Core library for the roof/site raster derivation pipeline.
//!
//! The pipeline turns an orthophoto, a DEM, a thermal raster and a boundary
//! drawing into a six-band composite (R, G, B, slope, normalized elevation,
//! thermal). The raster operations themselves are delegated to a
//! [`RasterEngine`]; this crate owns the stage ordering, the artifact table and
//! the data handed from one stage to the next.

pub mod artifact;
pub mod config;
pub mod engine;
pub mod expression;
pub mod pipeline;
pub mod registry;
pub mod testing;

pub use artifact::{Artifact, ArtifactKind, ArtifactTable};
pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError, RegistryBackend, RegistryConfig,
};
pub use engine::{EngineConfig, EngineError, GdalEngine, RasterEngine};
pub use expression::{BandRef, BinaryOp, RasterExpression};
pub use pipeline::{
    CompositeBranches, DemBranchSource, ErrorPolicy, PipelineConfig, PipelineDefinition,
    PipelineError, PipelineProgress, PipelineRunner, PipelineVariant, RunInputs, RunResult,
    SkipReason, StageError, StageId, StageOutcome, StageReport, StatisticPolicy, ZonalStatistic,
};
pub use registry::{LayerRegistry, ManifestRegistry, NoopRegistry, RegisteredLayer, RegistryError};
