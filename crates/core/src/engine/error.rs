//! Error types for the engine module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// External tool binary not found.
    #[error("Tool not found at path: {path}")]
    ToolNotFound { path: PathBuf },

    /// Input dataset not found.
    #[error("Input not found: {path}")]
    InputNotFound { path: PathBuf },

    /// External tool exited unsuccessfully.
    #[error("{tool} failed: {reason}{}", stderr_suffix(.stderr))]
    CommandFailed {
        tool: String,
        reason: String,
        stderr: Option<String>,
    },

    /// The tool reported success but the output is missing.
    #[error("Output not created: {path}")]
    MissingOutput { path: PathBuf },

    /// External call timed out.
    #[error("{tool} timed out after {timeout_secs} seconds")]
    Timeout { tool: String, timeout_secs: u64 },

    /// Dataset could not be opened or is malformed.
    #[error("Invalid dataset {path}: {reason}")]
    InvalidDataset { path: PathBuf, reason: String },

    /// The job parameters are inconsistent.
    #[error("Invalid job: {reason}")]
    InvalidJob { reason: String },

    /// Failed to parse tool output.
    #[error("Failed to parse {what}: {reason}")]
    ParseError { what: String, reason: String },

    /// The linked GDAL library is too old.
    #[error("GDAL {version} is not supported, 3.7 or newer is required")]
    UnsupportedGdal { version: String },

    /// Raster read through the GDAL library failed.
    #[error("GDAL error: {0}")]
    Gdal(#[from] ::gdal::errors::GdalError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a command failed error with captured stderr.
    pub fn command_failed(
        tool: impl Into<String>,
        reason: impl Into<String>,
        stderr: Option<String>,
    ) -> Self {
        Self::CommandFailed {
            tool: tool.into(),
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates an invalid dataset error.
    pub fn invalid_dataset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid job error.
    pub fn invalid_job(reason: impl Into<String>) -> Self {
        Self::InvalidJob {
            reason: reason.into(),
        }
    }
}

/// Trimmed tool diagnostics appended to the failure message.
fn stderr_suffix(stderr: &Option<String>) -> String {
    match stderr.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => format!(": {text}"),
        _ => String::new(),
    }
}
