//! Error types for the pipeline module.

use std::path::PathBuf;
use thiserror::Error;

use super::types::StageId;
use crate::engine::EngineError;

/// A stage list that violates the dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("stage {stage} depends on disabled stage {dependency}")]
    DisabledDependency { stage: StageId, dependency: StageId },

    #[error("stage {stage} runs before its dependency {dependency}")]
    OutOfOrder { stage: StageId, dependency: StageId },

    #[error("stage {0} is listed twice")]
    Duplicate(StageId),
}

/// Run-level errors. Stage failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single stage failed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Degenerate statistic from {path}: {reason}")]
    DegenerateStatistic { path: PathBuf, reason: String },

    #[error("Expected {expected} bands, found {actual}")]
    BandCountMismatch { expected: usize, actual: usize },

    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    #[error("No output recorded for stage {0}")]
    MissingOutput(StageId),
}

impl StageError {
    pub fn invalid_artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
