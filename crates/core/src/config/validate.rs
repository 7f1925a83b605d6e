use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - CRS identifier is not empty
/// - Engine timeout is not 0
/// - Rank filter radius >= 1 and rank within 0..=100
/// - Resampling scale is positive
/// - Rescale range is ordered and fits in a byte
/// - Band indices are 1-based
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.crs.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "crs cannot be empty".to_string(),
        ));
    }

    if config.engine.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.timeout_secs cannot be 0".to_string(),
        ));
    }

    let pipeline = &config.pipeline;

    if pipeline.rank_filter.radius == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.rank_filter.radius must be at least 1".to_string(),
        ));
    }

    if !(0.0..=100.0).contains(&pipeline.rank_filter.rank) {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.rank_filter.rank must be within 0..=100, got {}",
            pipeline.rank_filter.rank
        )));
    }

    if !(pipeline.resampling_filter.scale > 0.0) {
        return Err(ConfigError::ValidationError(
            "pipeline.resampling_filter.scale must be positive".to_string(),
        ));
    }

    let range = &pipeline.rescale;
    if !(range.min < range.max) || range.min < 0.0 || range.max > 255.0 {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.rescale must satisfy 0 <= min < max <= 255, got [{}, {}]",
            range.min, range.max
        )));
    }

    if pipeline.rgb_bands.is_empty() || pipeline.rgb_bands.contains(&0) {
        return Err(ConfigError::ValidationError(
            "pipeline.rgb_bands must list 1-based band indices".to_string(),
        ));
    }

    if pipeline.thermal_band == 0 || pipeline.statistic_band == 0 || pipeline.slope_band == 0 {
        return Err(ConfigError::ValidationError(
            "band indices are 1-based".to_string(),
        ));
    }

    Ok(())
}
