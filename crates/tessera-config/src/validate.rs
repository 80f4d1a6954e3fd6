//! Range checks applied after parsing.

use crate::error::{ConfigError, ConfigResult};
use crate::types::RuntimeConfig;

/// One wasm page.
const WASM_PAGE_SIZE: u64 = 64 * 1024;

pub(crate) fn validate(config: &RuntimeConfig) -> ConfigResult<()> {
    validate_sandbox(config)?;
    validate_runtime(config)?;
    Ok(())
}

fn validate_sandbox(config: &RuntimeConfig) -> ConfigResult<()> {
    let s = &config.sandbox;

    if s.memory_limit_bytes < WASM_PAGE_SIZE {
        return Err(ConfigError::ValidationError {
            field: "sandbox.memory_limit_bytes".to_owned(),
            message: format!(
                "memory_limit_bytes ({}) must be at least one wasm page ({WASM_PAGE_SIZE})",
                s.memory_limit_bytes
            ),
        });
    }

    if s.call_timeout_secs == Some(0) {
        return Err(ConfigError::ValidationError {
            field: "sandbox.call_timeout_secs".to_owned(),
            message: "call_timeout_secs must be positive when set".to_owned(),
        });
    }

    Ok(())
}

fn validate_runtime(config: &RuntimeConfig) -> ConfigResult<()> {
    if config.runtime.units_dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "runtime.units_dir".to_owned(),
            message: "units_dir must not be empty".to_owned(),
        });
    }

    if config
        .runtime
        .snapshot_path
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::ValidationError {
            field: "runtime.snapshot_path".to_owned(),
            message: "snapshot_path must not be empty; omit it to disable snapshots".to_owned(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn test_memory_below_one_page_rejected() {
        let mut config = RuntimeConfig::default();
        config.sandbox.memory_limit_bytes = 1024;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("sandbox.memory_limit_bytes"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = RuntimeConfig::default();
        config.sandbox.call_timeout_secs = Some(0);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError { field, .. }) if field == "sandbox.call_timeout_secs"
        ));
    }

    #[test]
    fn test_empty_snapshot_path_rejected() {
        let mut config = RuntimeConfig::default();
        config.runtime.snapshot_path = Some(std::path::PathBuf::new());
        assert!(validate(&config).is_err());

        config.runtime.snapshot_path = None;
        assert!(validate(&config).is_ok());
    }
}
