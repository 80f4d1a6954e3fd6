//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to install the process-wide subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The base level or an extra directive did not parse.
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter {
        /// The offending filter text.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// The rolling log directory could not be prepared.
    #[error("cannot use log directory {path}: {source}")]
    LogDirectory {
        /// Directory named by the target.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Building the file appender failed.
    #[error("cannot open log file in {path}: {reason}")]
    Appender {
        /// Directory named by the target.
        path: PathBuf,
        /// Appender message.
        reason: String,
    },

    /// Another subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
