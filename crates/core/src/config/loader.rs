use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment prefix for overrides, e.g. `STRECHA_PIPELINE__ERROR_POLICY=abort`.
const ENV_PREFIX: &str = "STRECHA_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from an optional file; defaults plus environment
/// overrides when no file is given.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string())),
    }
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ErrorPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
crs = "EPSG:5514"

[pipeline]
error_policy = "abort"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.pipeline.error_policy, ErrorPolicy::Abort);
    }

    #[test]
    fn test_load_config_from_str_invalid_type() {
        let toml = r#"
[engine]
timeout_secs = "soon"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/strecha.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[pipeline]
fallback_median = 250.0

[pipeline.resampling_filter]
scale = 10.0
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.pipeline.fallback_median, 250.0);
        assert_eq!(config.pipeline.resampling_filter.scale, 10.0);
        // untouched sections keep their defaults
        assert_eq!(config.crs, "EPSG:5514");
    }

    #[test]
    fn test_load_config_without_file_uses_defaults() {
        let config = load_config_or_default(None).unwrap();
        assert_eq!(config.pipeline.byte_nodata, 255);
    }
}
