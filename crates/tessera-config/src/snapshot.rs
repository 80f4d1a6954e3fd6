//! Component snapshots and the store that encodes them.
//!
//! A snapshot records, in registry order, the unit each component was loaded
//! from and a coarse state. Only two coarse states exist: a component that has
//! ever been deployed is recorded as [`CoarseState::Deployed`], whether it is
//! currently running or not.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Persisted lifecycle state of a snapshot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoarseState {
    /// Recreate the component and leave it loaded.
    Loaded,
    /// Recreate the component and deploy it.
    Deployed,
}

/// One component in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    /// Path of the unit the component was loaded from.
    pub unit_path: PathBuf,
    /// State to restore.
    pub state: CoarseState,
}

impl SnapshotEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(unit_path: impl Into<PathBuf>, state: CoarseState) -> Self {
        Self {
            unit_path: unit_path.into(),
            state,
        }
    }
}

/// Ordered description of a registry's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Entries in ascending component id order.
    #[serde(default)]
    pub components: Vec<SnapshotEntry>,
}

impl ConfigSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, entry: SnapshotEntry) {
        self.components.push(entry);
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the snapshot has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Iterate over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.components.iter()
    }
}

impl FromIterator<SnapshotEntry> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = SnapshotEntry>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
        }
    }
}

/// Converts snapshots to and from bytes.
///
/// The orchestrator only ever talks to this trait, so the encoding can be
/// swapped without touching lifecycle code.
pub trait ConfigStore: Send + Sync {
    /// Encode a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded.
    fn save(&self, snapshot: &ConfigSnapshot) -> ConfigResult<Vec<u8>>;

    /// Decode a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid snapshot document.
    fn load(&self, bytes: &[u8]) -> ConfigResult<ConfigSnapshot>;
}

/// JSON encoding: `{"components":[{"unitPath":"...","state":"LOADED"}]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConfigStore {
    pretty: bool,
}

impl JsonConfigStore {
    /// Create a store that writes compact JSON.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write indented JSON.
    #[must_use]
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl ConfigStore for JsonConfigStore {
    fn save(&self, snapshot: &ConfigSnapshot) -> ConfigResult<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(snapshot)?
        } else {
            serde_json::to_vec(snapshot)?
        };
        Ok(bytes)
    }

    fn load(&self, bytes: &[u8]) -> ConfigResult<ConfigSnapshot> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Atomically replace `path` with `bytes`.
///
/// The data goes to a temporary file in the same directory first and is then
/// renamed over the target, so readers never observe a half-written snapshot.
///
/// # Errors
///
/// Returns [`ConfigError::WriteError`] if the directory cannot be created or
/// the file cannot be written or renamed.
pub fn write_snapshot_file(path: &Path, bytes: &[u8]) -> ConfigResult<()> {
    let write_err = |source: std::io::Error| ConfigError::WriteError {
        path: path.display().to_string(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
    Ok(())
}

/// Read a snapshot file.
///
/// # Errors
///
/// Returns [`ConfigError::ReadError`] if the file cannot be read.
pub fn read_snapshot_file(path: &Path) -> ConfigResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| ConfigError::ReadError {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigSnapshot {
        [
            SnapshotEntry::new("units/a.unit", CoarseState::Loaded),
            SnapshotEntry::new("units/b.unit", CoarseState::Deployed),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_wire_format() {
        let bytes = JsonConfigStore::new().save(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            r#"{"components":[{"unitPath":"units/a.unit","state":"LOADED"},{"unitPath":"units/b.unit","state":"DEPLOYED"}]}"#
        );
    }

    #[test]
    fn test_load_preserves_order() {
        let store = JsonConfigStore::new().pretty();
        let bytes = store.save(&sample()).unwrap();
        let loaded = store.load(&bytes).unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.components[1].state, CoarseState::Deployed);
    }

    #[test]
    fn test_load_rejects_unknown_state() {
        let doc = br#"{"components":[{"unitPath":"x.unit","state":"STARTED"}]}"#;
        assert!(matches!(
            JsonConfigStore::new().load(doc),
            Err(ConfigError::SnapshotError(_))
        ));
    }

    #[test]
    fn test_load_missing_components_is_empty() {
        let loaded = JsonConfigStore::new().load(b"{}").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_garbage() {
        assert!(JsonConfigStore::new().load(b"not json").is_err());
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.json");

        write_snapshot_file(&path, b"first").unwrap();
        write_snapshot_file(&path, b"second").unwrap();

        assert_eq!(read_snapshot_file(&path).unwrap(), b"second");
        // Only the target remains; temp files were renamed away.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_snapshot_file(&dir.path().join("none.json")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
