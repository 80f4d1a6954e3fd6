//! Packaged unit references.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{RuntimeError, RuntimeResult};

/// File extension every packaged unit carries.
pub const UNIT_EXTENSION: &str = "unit";

/// Largest unit file accepted (256 MB).
pub const MAX_UNIT_SIZE: u64 = 256 * 1024 * 1024;

/// An immutable reference to a `.unit` file.
///
/// Resolving checks the reference itself. Reading the bytes happens when an
/// [`ExecutionContext`](crate::ExecutionContext) is built from it, so a unit
/// that disappears between resolve and load still fails with a load error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackagedUnit {
    path: PathBuf,
    name: String,
}

impl PackagedUnit {
    /// Resolve a path into a unit reference.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`] if the path does not end in `.unit`
    /// or has no usable file stem.
    pub fn resolve(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();

        if !Self::is_unit_path(path) {
            return Err(RuntimeError::load(
                path,
                format!("not a packaged unit (expected a .{UNIT_EXTENSION} file)"),
            ));
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RuntimeError::load(path, "unit file name is not valid UTF-8"))?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
        })
    }

    /// Whether `path` carries the unit extension.
    #[must_use]
    pub fn is_unit_path(path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(UNIT_EXTENSION))
    }

    /// Path of the unit file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unit name, taken from the file stem.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the unit's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`] if the file is missing, unreadable,
    /// not a regular file, or larger than [`MAX_UNIT_SIZE`].
    pub fn read_bytes(&self) -> RuntimeResult<Vec<u8>> {
        let meta = std::fs::metadata(&self.path)
            .map_err(|e| RuntimeError::load(&self.path, format!("cannot stat unit: {e}")))?;
        if !meta.is_file() {
            return Err(RuntimeError::load(&self.path, "not a regular file"));
        }
        if meta.len() > MAX_UNIT_SIZE {
            return Err(RuntimeError::load(
                &self.path,
                format!(
                    "unit is {} bytes, exceeding the {MAX_UNIT_SIZE} byte limit",
                    meta.len()
                ),
            ));
        }

        std::fs::read(&self.path)
            .map_err(|e| RuntimeError::load(&self.path, format!("cannot read unit: {e}")))
    }
}

impl fmt::Display for PackagedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_takes_name_from_stem() {
        let unit = PackagedUnit::resolve("units/clock.unit").unwrap();
        assert_eq!(unit.name(), "clock");
        assert_eq!(unit.path(), Path::new("units/clock.unit"));
    }

    #[test]
    fn test_resolve_rejects_other_extensions() {
        for path in ["units/clock.jar", "units/clock", "units/clock.unit.bak"] {
            assert!(
                matches!(PackagedUnit::resolve(path), Err(RuntimeError::Load { .. })),
                "{path} should not resolve"
            );
        }
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert!(PackagedUnit::is_unit_path(Path::new("A.UNIT")));
    }

    #[test]
    fn test_read_missing_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let unit = PackagedUnit::resolve(dir.path().join("gone.unit")).unwrap();
        let err = unit.read_bytes().unwrap_err();
        assert!(matches!(err, RuntimeError::Load { .. }));
        assert!(err.to_string().contains("gone.unit"));
    }

    #[test]
    fn test_read_directory_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("nested.unit");
        std::fs::create_dir(&sub).unwrap();
        let unit = PackagedUnit::resolve(&sub).unwrap();
        assert!(unit.read_bytes().is_err());
    }
}
