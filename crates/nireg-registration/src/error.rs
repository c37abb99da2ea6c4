//! Error types for the registration pipeline.
//!
//! Every failure the pipeline can hit is surfaced as a [`RegistrationError`]
//! and returned to the caller; nothing is printed and swallowed.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Inputs rejected by the configured extension policy.
    #[error(
        "Invalid extension: images must be .nii or .nii.gz (fixed: {}, moving: {})",
        .fixed.display(),
        .moving.display()
    )]
    InvalidExtension { fixed: PathBuf, moving: PathBuf },

    /// The engine binary could not be started.
    #[error("Registration engine not found: {}", .binary.display())]
    EngineNotFound { binary: PathBuf },

    /// The engine ran and reported failure.
    #[error("Registration engine failed ({status}): {log_tail}")]
    EngineExecutionFailed { status: String, log_tail: String },

    /// The engine exited cleanly but an expected output file is missing.
    #[error("Registration engine produced no output at {}", .0.display())]
    MissingEngineOutput(PathBuf),

    /// Engine executed without images or parameters being set.
    #[error("Engine not configured: {0}")]
    EngineNotConfigured(String),

    /// `output()` called before any stage produced a result.
    #[error("No result image available; run the registration first")]
    NoResult,

    /// Reading or writing an image failed.
    #[error("Image I/O error: {0}")]
    ImageIo(String),

    /// Malformed parameter file or value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Filesystem failure with the operation that caused it.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid extension error.
    pub fn invalid_extension(fixed: impl Into<PathBuf>, moving: impl Into<PathBuf>) -> Self {
        Self::InvalidExtension {
            fixed: fixed.into(),
            moving: moving.into(),
        }
    }

    /// Create an image I/O error from anything printable (typically `anyhow::Error`).
    pub fn image_io(err: impl std::fmt::Display) -> Self {
        Self::ImageIo(format!("{:#}", err))
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for a missing-file I/O failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
