//! Error types for picapture.
//!
//! Every fallible operation in the crate returns [`Error`]. Inside the capture
//! loop most of these are logged and swallowed; only startup errors end the
//! process.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// The main error type for picapture operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Capture Errors ===
    /// The capture program could not be started.
    #[error("failed to launch capture program '{program}': {source}")]
    CaptureSpawn {
        /// Program that was being launched.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The capture program ran but reported failure.
    #[error("capture program '{program}' failed: {status}")]
    CaptureFailed {
        /// Program that failed.
        program: String,
        /// Exit status reported by the program.
        status: ExitStatus,
    },

    // === Store Errors ===
    /// A command against the shared store failed.
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The record held in the store could not be understood.
    #[error("invalid capture record under '{key}': {message}")]
    InvalidRecord {
        /// Key the record was read from.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A specialized Result type for picapture operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create an invalid record error.
    #[must_use]
    pub fn invalid_record(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from the capture step.
    #[must_use]
    pub fn is_capture_error(&self) -> bool {
        matches!(self, Self::CaptureSpawn { .. } | Self::CaptureFailed { .. })
    }

    /// Check if this error came from the shared store.
    #[must_use]
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::InvalidRecord { .. })
    }
}
