//! Reading `tessera.toml` from disk.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::RuntimeConfig;
use crate::validate;

/// Largest config file accepted (1 MB).
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Load and validate a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::ReadError`] if the file cannot be read,
/// [`ConfigError::ParseError`] if it is not valid TOML for [`RuntimeConfig`],
/// and [`ConfigError::ValidationError`] if it is too large or a value is out
/// of range.
pub fn load_file(path: &Path) -> ConfigResult<RuntimeConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    // Checked after reading so the size and the parsed bytes agree.
    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let config: RuntimeConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    validate::validate(&config)?;
    info!(path = %path.display(), "loaded runtime config");
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to defaults.
///
/// # Errors
///
/// Same as [`load_file`], except that a missing file is not an error.
pub fn load_or_default(path: &Path) -> ConfigResult<RuntimeConfig> {
    if path.exists() {
        load_file(path)
    } else {
        debug!(path = %path.display(), "config file not found, using defaults");
        Ok(RuntimeConfig::default())
    }
}
