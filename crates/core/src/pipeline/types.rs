//! Types for the pipeline module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

use super::config::{DemBranchSource, PipelineVariant};
use super::error::StageError;
use crate::artifact::Artifact;

/// The fixed stages, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    SelectRgb,
    ConvertBoundary,
    ClipDem,
    ZonalMedian,
    NormalizeDem,
    RankFilter,
    TranslateRank,
    RescaleDem,
    DemTo8Bit,
    ResamplingFilter,
    TranslateHighPass,
    Slope,
    SlopeTo8Bit,
    SelectThermal,
    Merge,
}

impl StageId {
    pub fn all() -> [StageId; 15] {
        [
            Self::SelectRgb,
            Self::ConvertBoundary,
            Self::ClipDem,
            Self::ZonalMedian,
            Self::NormalizeDem,
            Self::RankFilter,
            Self::TranslateRank,
            Self::RescaleDem,
            Self::DemTo8Bit,
            Self::ResamplingFilter,
            Self::TranslateHighPass,
            Self::Slope,
            Self::SlopeTo8Bit,
            Self::SelectThermal,
            Self::Merge,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectRgb => "select_rgb",
            Self::ConvertBoundary => "convert_boundary",
            Self::ClipDem => "clip_dem",
            Self::ZonalMedian => "zonal_median",
            Self::NormalizeDem => "normalize_dem",
            Self::RankFilter => "rank_filter",
            Self::TranslateRank => "translate_rank",
            Self::RescaleDem => "rescale_dem",
            Self::DemTo8Bit => "dem_to_8bit",
            Self::ResamplingFilter => "resampling_filter",
            Self::TranslateHighPass => "translate_high_pass",
            Self::Slope => "slope",
            Self::SlopeTo8Bit => "slope_to_8bit",
            Self::SelectThermal => "select_thermal",
            Self::Merge => "merge",
        }
    }

    /// Layer name the stage's artifact is registered under.
    ///
    /// The SAGA-format filter outputs are only registered after conversion.
    pub fn display_name(&self) -> Option<&'static str> {
        match self {
            Self::SelectRgb => Some("ortofoto_RGB"),
            Self::ConvertBoundary => Some("Obvod"),
            Self::ClipDem => Some("Clipped_DEM"),
            Self::ZonalMedian => Some("Zonal_stats"),
            Self::NormalizeDem => Some("Normalized_DEM"),
            Self::RankFilter => None,
            Self::TranslateRank => Some("Filtered_DEM_rank"),
            Self::RescaleDem => Some("Rescaled_DEM"),
            Self::DemTo8Bit => Some("Rescaled_DEM_8bit"),
            Self::ResamplingFilter => None,
            Self::TranslateHighPass => Some("Filtered_DEM_hipass"),
            Self::Slope => Some("Slope"),
            Self::SlopeTo8Bit => Some("Slope_8bit"),
            Self::SelectThermal => Some("TIR_R_band"),
            Self::Merge => Some("RESULT"),
        }
    }

    /// Stages whose artifacts this stage reads.
    pub fn dependencies(&self, branch_source: DemBranchSource) -> Vec<StageId> {
        match self {
            Self::SelectRgb | Self::ConvertBoundary | Self::SelectThermal => vec![],
            Self::ClipDem => vec![Self::ConvertBoundary],
            Self::ZonalMedian => vec![Self::ConvertBoundary, Self::ClipDem],
            Self::NormalizeDem => vec![Self::ClipDem, Self::ZonalMedian],
            Self::RankFilter => vec![Self::NormalizeDem],
            Self::TranslateRank => vec![Self::RankFilter],
            Self::RescaleDem => match branch_source {
                DemBranchSource::RankFilter => vec![Self::TranslateRank],
                DemBranchSource::HighPass => vec![Self::TranslateHighPass],
            },
            Self::DemTo8Bit => vec![Self::RescaleDem],
            Self::ResamplingFilter => vec![Self::NormalizeDem],
            Self::TranslateHighPass => vec![Self::ResamplingFilter],
            Self::Slope => vec![Self::TranslateHighPass],
            Self::SlopeTo8Bit => vec![Self::Slope],
            Self::Merge => vec![
                Self::SelectRgb,
                Self::SlopeTo8Bit,
                Self::DemTo8Bit,
                Self::SelectThermal,
            ],
        }
    }

    /// Optional run input the stage cannot do without.
    pub fn required_input(&self) -> Option<&'static str> {
        match self {
            Self::SelectRgb => Some("orthophoto"),
            Self::SelectThermal => Some("thermal"),
            _ => None,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input files of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInputs {
    /// CAD boundary drawing.
    pub boundary: PathBuf,
    pub dem: PathBuf,
    pub orthophoto: Option<PathBuf>,
    pub thermal: Option<PathBuf>,
}

impl RunInputs {
    pub fn new(boundary: impl Into<PathBuf>, dem: impl Into<PathBuf>) -> Self {
        Self {
            boundary: boundary.into(),
            dem: dem.into(),
            orthophoto: None,
            thermal: None,
        }
    }

    pub fn with_orthophoto(mut self, path: impl Into<PathBuf>) -> Self {
        self.orthophoto = Some(path.into());
        self
    }

    pub fn with_thermal(mut self, path: impl Into<PathBuf>) -> Self {
        self.thermal = Some(path.into());
        self
    }

    /// Looks up an optional input by the name `StageId::required_input` uses.
    pub fn optional(&self, name: &str) -> Option<&PathBuf> {
        match name {
            "orthophoto" => self.orthophoto.as_ref(),
            "thermal" => self.thermal.as_ref(),
            _ => None,
        }
    }
}

/// The zonal median handed to the normalization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatistic {
    pub value: f64,
    /// The value is the configured fallback, not a computed median.
    pub degraded: bool,
    pub feature_count: u64,
    pub layer: Artifact,
}

/// Why a stage did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingDependency { stages: Vec<StageId> },
    Aborted { after: StageId },
    MissingInput { input: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency { stages } => {
                let names: Vec<&str> = stages.iter().map(StageId::name).collect();
                write!(f, "missing dependency: {}", names.join(", "))
            }
            Self::Aborted { after } => write!(f, "run aborted after {after} failed"),
            Self::MissingInput { input } => write!(f, "no {input} input"),
        }
    }
}

/// Result of one stage.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed {
        /// The primary artifact comes first.
        artifacts: Vec<Artifact>,
        #[serde(skip_serializing_if = "Option::is_none")]
        statistic: Option<ZonalStatistic>,
    },
    Failed {
        #[serde(serialize_with = "serialize_error")]
        error: StageError,
    },
    Skipped {
        reason: SkipReason,
    },
}

fn serialize_error<S: Serializer>(error: &StageError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl StageOutcome {
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Completed { .. } => StageStatus::Completed,
            Self::Failed { .. } => StageStatus::Failed,
            Self::Skipped { .. } => StageStatus::Skipped,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        match self {
            Self::Completed { artifacts, .. } => artifacts,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct StageReport {
    pub stage: StageId,
    pub outcome: StageOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Progress events of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineProgress {
    /// Emitted only for stages that actually call the engine.
    StageStarted {
        stage: StageId,
        index: usize,
        total: usize,
    },
    StageFinished {
        stage: StageId,
        status: StageStatus,
    },
    RunCompleted {
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Outcome of a whole run: one report per enabled stage, in execution order.
#[derive(Debug, Serialize)]
pub struct RunResult {
    pub output_dir: PathBuf,
    pub variant: PipelineVariant,
    pub dem_branch_source: DemBranchSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    /// Stages whose artifacts are the deliverables of the run.
    pub terminal_stages: Vec<StageId>,
}

impl RunResult {
    /// Whether every enabled stage completed.
    pub fn succeeded(&self) -> bool {
        self.stages.iter().all(|report| report.outcome.is_completed())
    }

    pub fn report(&self, stage: StageId) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }

    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.report(stage).map(|report| &report.outcome)
    }

    fn stages_with(&self, status: StageStatus) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|report| report.outcome.status() == status)
            .map(|report| report.stage)
            .collect()
    }

    pub fn completed_stages(&self) -> Vec<StageId> {
        self.stages_with(StageStatus::Completed)
    }

    pub fn failed_stages(&self) -> Vec<StageId> {
        self.stages_with(StageStatus::Failed)
    }

    pub fn skipped_stages(&self) -> Vec<StageId> {
        self.stages_with(StageStatus::Skipped)
    }

    /// Primary artifact of a completed stage.
    pub fn artifact(&self, stage: StageId) -> Option<&Artifact> {
        self.outcome(stage)?.artifacts().first()
    }

    /// Primary artifacts of the terminal stages that completed.
    pub fn final_artifacts(&self) -> Vec<&Artifact> {
        self.terminal_stages
            .iter()
            .filter_map(|stage| self.artifact(*stage))
            .collect()
    }

    /// The zonal median, if the statistics stage completed.
    pub fn statistic(&self) -> Option<&ZonalStatistic> {
        match self.outcome(StageId::ZonalMedian)? {
            StageOutcome::Completed { statistic, .. } => statistic.as_ref(),
            _ => None,
        }
    }
}
