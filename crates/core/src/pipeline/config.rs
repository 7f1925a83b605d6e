//! Configuration for the pipeline module.

use serde::{Deserialize, Serialize};

use crate::engine::KernelShape;

/// Which stages a run contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// RGB + slope + elevation + thermal, merged into one raster.
    #[default]
    Composite,
    /// Only the 8-bit slope and 8-bit elevation rasters.
    DemOnly,
}

impl PipelineVariant {
    /// Filtered raster the elevation branch rescales by default.
    pub fn default_branch_source(&self) -> DemBranchSource {
        match self {
            Self::Composite => DemBranchSource::RankFilter,
            Self::DemOnly => DemBranchSource::HighPass,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composite => "composite",
            Self::DemOnly => "dem_only",
        }
    }
}

/// Filter output feeding the rescale/8-bit elevation branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemBranchSource {
    /// Rank-filtered normalized DEM.
    RankFilter,
    /// High-pass output of the resampling filter, shared with the slope branch.
    HighPass,
}

/// What a failed stage does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Keep going; dependants of the failed stage are skipped.
    #[default]
    Continue,
    /// Skip every remaining stage.
    Abort,
}

/// What happens when the zonal statistic cannot be computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticPolicy {
    /// Use `fallback_median` and flag the statistic as degraded.
    #[default]
    Fallback,
    /// Fail the statistics stage.
    Fail,
}

/// Per-run switches of the composite-only branches.
///
/// Merging reads both selections, so turning either off requires turning
/// `merge` off as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeBranches {
    #[serde(default = "default_true")]
    pub rgb: bool,
    #[serde(default = "default_true")]
    pub thermal: bool,
    #[serde(default = "default_true")]
    pub merge: bool,
}

impl Default for CompositeBranches {
    fn default() -> Self {
        Self {
            rgb: true,
            thermal: true,
            merge: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankFilterConfig {
    #[serde(default = "default_rank_radius")]
    pub radius: u32,
    /// Percentile, 50 is the median.
    #[serde(default = "default_rank")]
    pub rank: f64,
    #[serde(default)]
    pub kernel: KernelShape,
}

impl Default for RankFilterConfig {
    fn default() -> Self {
        Self {
            radius: default_rank_radius(),
            rank: default_rank(),
            kernel: KernelShape::default(),
        }
    }
}

fn default_rank_radius() -> u32 {
    2
}

fn default_rank() -> f64 {
    50.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResamplingFilterConfig {
    #[serde(default = "default_resampling_scale")]
    pub scale: f64,
}

impl Default for ResamplingFilterConfig {
    fn default() -> Self {
        Self {
            scale: default_resampling_scale(),
        }
    }
}

fn default_resampling_scale() -> f64 {
    1.0
}

/// Target range of the elevation rescale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescaleRange {
    #[serde(default = "default_rescale_min")]
    pub min: f64,
    #[serde(default = "default_rescale_max")]
    pub max: f64,
}

impl Default for RescaleRange {
    fn default() -> Self {
        Self {
            min: default_rescale_min(),
            max: default_rescale_max(),
        }
    }
}

fn default_rescale_min() -> f64 {
    0.0
}

fn default_rescale_max() -> f64 {
    255.0
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub variant: PipelineVariant,

    /// Overrides the variant's filter-to-branch mapping.
    #[serde(default)]
    pub dem_branch_source: Option<DemBranchSource>,

    /// Per-run switches of the composite-only branches.
    #[serde(default)]
    pub branches: CompositeBranches,

    #[serde(default)]
    pub error_policy: ErrorPolicy,

    #[serde(default)]
    pub statistic_policy: StatisticPolicy,

    /// Median used when the statistics layer is empty.
    #[serde(default)]
    pub fallback_median: f64,

    /// Register the input layers before processing.
    #[serde(default = "default_true")]
    pub register_inputs: bool,

    /// Exit non-zero when any stage failed or was skipped.
    #[serde(default)]
    pub strict_exit: bool,

    #[serde(default)]
    pub rank_filter: RankFilterConfig,

    #[serde(default)]
    pub resampling_filter: ResamplingFilterConfig,

    #[serde(default)]
    pub rescale: RescaleRange,

    /// Sentinel of the 8-bit rasters.
    #[serde(default = "default_byte_nodata")]
    pub byte_nodata: u8,

    /// No-data value written outside the mask when clipping.
    #[serde(default = "default_clip_nodata")]
    pub clip_nodata: f64,

    #[serde(default = "default_rgb_bands")]
    pub rgb_bands: Vec<u32>,

    #[serde(default = "default_band")]
    pub thermal_band: u32,

    /// DEM band the zonal median is computed on.
    #[serde(default = "default_band")]
    pub statistic_band: u32,

    #[serde(default = "default_band")]
    pub slope_band: u32,

    /// Prefix of the statistics column.
    #[serde(default = "default_column_prefix")]
    pub statistic_column_prefix: String,

    /// Creation options of the GeoTIFF conversions.
    #[serde(default = "default_creation_options")]
    pub creation_options: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_byte_nodata() -> u8 {
    255
}

fn default_clip_nodata() -> f64 {
    -9999.0
}

fn default_rgb_bands() -> Vec<u32> {
    vec![1, 2, 3]
}

fn default_band() -> u32 {
    1
}

fn default_column_prefix() -> String {
    "_".to_string()
}

fn default_creation_options() -> Vec<String> {
    vec!["COMPRESS=DEFLATE".to_string()]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: PipelineVariant::default(),
            dem_branch_source: None,
            branches: CompositeBranches::default(),
            error_policy: ErrorPolicy::default(),
            statistic_policy: StatisticPolicy::default(),
            fallback_median: 0.0,
            register_inputs: default_true(),
            strict_exit: false,
            rank_filter: RankFilterConfig::default(),
            resampling_filter: ResamplingFilterConfig::default(),
            rescale: RescaleRange::default(),
            byte_nodata: default_byte_nodata(),
            clip_nodata: default_clip_nodata(),
            rgb_bands: default_rgb_bands(),
            thermal_band: default_band(),
            statistic_band: default_band(),
            slope_band: default_band(),
            statistic_column_prefix: default_column_prefix(),
            creation_options: default_creation_options(),
        }
    }
}

impl PipelineConfig {
    /// Effective filter-to-branch mapping.
    pub fn branch_source(&self) -> DemBranchSource {
        self.dem_branch_source
            .unwrap_or_else(|| self.variant.default_branch_source())
    }

    /// Sets the variant.
    pub fn with_variant(mut self, variant: PipelineVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_branches(mut self, branches: CompositeBranches) -> Self {
        self.branches = branches;
        self
    }

    /// Sets the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Sets the degenerate statistic policy.
    pub fn with_statistic_policy(mut self, policy: StatisticPolicy) -> Self {
        self.statistic_policy = policy;
        self
    }

    /// Overrides the filter-to-branch mapping.
    pub fn with_branch_source(mut self, source: DemBranchSource) -> Self {
        self.dem_branch_source = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.variant, PipelineVariant::Composite);
        assert_eq!(config.rank_filter.radius, 2);
        assert_eq!(config.rank_filter.rank, 50.0);
        assert_eq!(config.rank_filter.kernel, KernelShape::Square);
        assert_eq!(config.resampling_filter.scale, 1.0);
        assert_eq!(config.byte_nodata, 255);
        assert_eq!(config.rgb_bands, vec![1, 2, 3]);
        assert!(config.register_inputs);
        assert!(!config.strict_exit);
    }

    #[test]
    fn test_branch_source_presets() {
        let composite = PipelineConfig::default();
        assert_eq!(composite.branch_source(), DemBranchSource::RankFilter);

        let dem_only = PipelineConfig::default().with_variant(PipelineVariant::DemOnly);
        assert_eq!(dem_only.branch_source(), DemBranchSource::HighPass);
    }

    #[test]
    fn test_branch_source_override() {
        let config = PipelineConfig::default()
            .with_variant(PipelineVariant::DemOnly)
            .with_branch_source(DemBranchSource::RankFilter);
        assert_eq!(config.branch_source(), DemBranchSource::RankFilter);
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::default()
            .with_error_policy(ErrorPolicy::Abort)
            .with_statistic_policy(StatisticPolicy::Fail);
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.statistic_policy, StatisticPolicy::Fail);
    }

    #[test]
    fn test_branch_switches_from_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [branches]
            thermal = false
            merge = false
            "#,
        )
        .unwrap();
        assert!(config.branches.rgb);
        assert!(!config.branches.thermal);
        assert!(!config.branches.merge);
        assert_eq!(PipelineConfig::default().branches, CompositeBranches::default());
    }
}
