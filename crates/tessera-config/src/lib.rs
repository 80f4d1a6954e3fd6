//! Tessera Config - configuration and snapshot persistence.
//!
//! Two documents live here:
//! - [`RuntimeConfig`], the operator-facing `tessera.toml`
//! - [`ConfigSnapshot`], the JSON record of which units are loaded and in
//!   which coarse state, used to recreate a registry after a restart

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod loader;
mod snapshot;
mod types;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{MAX_CONFIG_FILE_SIZE, load_file, load_or_default};
pub use snapshot::{
    CoarseState, ConfigSnapshot, ConfigStore, JsonConfigStore, SnapshotEntry, read_snapshot_file,
    write_snapshot_file,
};
pub use types::{RuntimeConfig, RuntimeSection, SandboxConfig};
