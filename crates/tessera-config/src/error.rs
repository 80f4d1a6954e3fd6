//! Error types for configuration and snapshot handling.

use thiserror::Error;

/// Errors that can occur while loading configuration or snapshots.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path that could not be read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("failed to write {path}: {source}")]
    WriteError {
        /// Path that could not be written.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML configuration could not be parsed.
    #[error("failed to parse {path}: {source}")]
    ParseError {
        /// Path of the malformed file.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A snapshot document could not be encoded or decoded.
    #[error("invalid snapshot: {0}")]
    SnapshotError(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid value for {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
