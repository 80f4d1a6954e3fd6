//! Configuration document types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_telemetry::LogConfig;

/// Top-level contents of `tessera.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Where units come from and where snapshots go.
    pub runtime: RuntimeSection,
    /// Limits applied to every execution context.
    pub sandbox: SandboxConfig,
    /// Process logging.
    pub logging: LogConfig,
}

/// `[runtime]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Directory scanned by `loadall` when no directory is given.
    pub units_dir: PathBuf,
    /// File the component snapshot is written to after structural changes.
    /// `None` disables automatic persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            units_dir: PathBuf::from("units"),
            snapshot_path: Some(PathBuf::from("config/tessera-snapshot.json")),
        }
    }
}

/// `[sandbox]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum linear memory per execution context, in bytes.
    pub memory_limit_bytes: u64,
    /// Upper bound on a single guest call. Unset by default because start
    /// procedures are expected to run until stopped.
    pub call_timeout_secs: Option<u64>,
    /// Whether units get WASI imports.
    pub wasi: bool,
}

/// Default memory limit: 64 MB.
const DEFAULT_MEMORY_LIMIT: u64 = 64 * 1024 * 1024;

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
            call_timeout_secs: None,
            wasi: false,
        }
    }
}

impl SandboxConfig {
    /// Set the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Enable or disable WASI.
    #[must_use]
    pub fn with_wasi(mut self, wasi: bool) -> Self {
        self.wasi = wasi;
        self
    }

    /// The per-call timeout, if any.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}
