//! Unified error type hierarchy for kbuild
//!
//! Provides structured error handling with BuildError, ConfigError, PatchError,
//! NotifyError and the top-level PipelineError returned by a pipeline run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Raised when a device selector has no row in the device table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device '{0}' is not supported")]
pub struct UnsupportedDevice(pub String);

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Build pipeline stage errors.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Source acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Source patching failed: {0}")]
    PatchingFailed(String),

    #[error("Environment configuration failed: {0}")]
    ConfigurationFailed(String),

    /// The build tool ran but reported failure.
    #[error("'make {step}' exited with status {code:?}")]
    ToolFailed { step: String, code: Option<i32> },

    /// The build tool succeeded but the expected image was not produced.
    #[error("Build finished but kernel image is missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Packaging failed: {0}")]
    PackagingFailed(String),
}

/// Kernel source patching errors.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Patch download failed: {0}")]
    DownloadFailed(String),

    #[error("Patch target file not found: {0}")]
    FileNotFound(String),

    #[error("Patch application failed: {0}")]
    PatchFailed(String),

    #[error("Unsafe archive entry rejected: {0}")]
    UnsafeArchiveEntry(String),

    #[error("IO error during patching: {0}")]
    IoError(#[from] io::Error),
}

/// Messaging transport errors. Never fatal to a pipeline run.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Bot API rejected {method}: HTTP {status}")]
    Rejected { method: String, status: u16 },

    #[error("IO error reading upload: {0}")]
    IoError(#[from] io::Error),
}

// The request URL carries the bot token and must never reach a log line.
impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.without_url())
    }
}

/// Error returned by a full pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedDevice),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl PipelineError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Unsupported(_) => 2,
            PipelineError::Build(_) => 1,
        }
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_device_display() {
        let err = UnsupportedDevice("unknown-device".to_string());
        assert_eq!(err.to_string(), "Device 'unknown-device' is not supported");
    }

    #[test]
    fn test_tool_failed_display() {
        let err = BuildError::ToolFailed {
            step: "mido_defconfig".to_string(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "'make mido_defconfig' exited with status Some(2)");
    }

    #[test]
    fn test_exit_codes_distinguish_rejection() {
        let rejected = PipelineError::from(UnsupportedDevice("x".to_string()));
        let failed = PipelineError::from(BuildError::PackagingFailed("x".to_string()));
        assert_eq!(rejected.exit_code(), 2);
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err("test error".into());
        assert!(result.is_err());
    }
}
