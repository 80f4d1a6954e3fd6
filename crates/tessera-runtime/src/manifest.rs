//! Unit manifests.
//!
//! A unit declares what it offers in a custom wasm section named
//! [`MANIFEST_SECTION`] holding UTF-8 TOML:
//!
//! ```toml
//! [[provider]]
//! type = "greeting"
//! export = "greet"
//! init = "greet_init"
//!
//! [[entry]]
//! kind = "start"
//! export = "run"
//!
//! [[entry]]
//! kind = "stop"
//! export = "halt"
//!
//! [[inject]]
//! slot = "log"
//! kind = "logger"
//! ```
//!
//! Discovery reads this declaration instead of probing the module, so a
//! unit without the section simply declares nothing.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Name of the custom section carrying the manifest.
pub const MANIFEST_SECTION: &str = "tessera-unit";

/// Everything a unit declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitManifest {
    /// Capability providers, in declaration order.
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderDecl>,
    /// Start/stop candidates.
    #[serde(default, rename = "entry")]
    pub entries: Vec<EntryDecl>,
    /// Collaborator slots to populate.
    #[serde(default, rename = "inject")]
    pub slots: Vec<SlotDecl>,
}

/// A capability provider declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderDecl {
    /// Capability type key the provider registers under.
    #[serde(rename = "type")]
    pub type_key: String,
    /// Export invoked for each use of the capability.
    pub export: String,
    /// Export invoked once when the provider is instantiated.
    #[serde(default)]
    pub init: Option<String>,
}

/// Kind of lifecycle entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Runs on its own thread when the component starts.
    Start,
    /// Runs on the caller's thread when the component stops.
    Stop,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// A start or stop candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryDecl {
    /// Start or stop.
    pub kind: EntryKind,
    /// Parameterless export implementing it.
    pub export: String,
}

/// What an injectable slot receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// A logger scoped `"<name>::<id>"`, reached through `tessera_log`.
    Logger,
    /// The capability lookup facility, reached through `tessera_capability`.
    Capabilities,
}

/// An injectable collaborator slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotDecl {
    /// Slot name, unique within the unit.
    pub slot: String,
    /// What to inject.
    pub kind: SlotKind,
}

impl UnitManifest {
    /// Parse a manifest document.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the document is malformed or has unknown keys.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Whether the unit asked for a slot of `kind`.
    #[must_use]
    pub fn wants(&self, kind: SlotKind) -> bool {
        self.slots.iter().any(|s| s.kind == kind)
    }

    /// Exports declared for entry points of `kind`, in declaration order.
    pub fn entries_of(&self, kind: EntryKind) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| e.export.as_str())
    }

    /// Check the manifest against the module's exported functions.
    fn check(&self, exports: &BTreeSet<String>) -> Result<(), String> {
        let require = |export: &str, what: &str| {
            if exports.contains(export) {
                Ok(())
            } else {
                Err(format!("{what} refers to missing export '{export}'"))
            }
        };

        for provider in &self.providers {
            if provider.type_key.trim().is_empty() {
                return Err("provider declared with an empty type".to_string());
            }
            require(&provider.export, &format!("provider '{}'", provider.type_key))?;
            if let Some(init) = &provider.init {
                require(init, &format!("provider '{}' init", provider.type_key))?;
            }
        }

        for entry in &self.entries {
            require(&entry.export, &format!("{} entry", entry.kind))?;
        }

        let mut seen = HashSet::new();
        for slot in &self.slots {
            if slot.slot.trim().is_empty() {
                return Err("inject slot declared with an empty name".to_string());
            }
            if !seen.insert(slot.slot.as_str()) {
                return Err(format!("inject slot '{}' declared twice", slot.slot));
            }
        }

        Ok(())
    }
}

/// What a unit's bytes contain, as far as the runtime cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitImage {
    /// The declared manifest (empty if the section is absent).
    pub manifest: UnitManifest,
    /// Names of all exported functions.
    pub exports: BTreeSet<String>,
}

/// Read the manifest section and function exports out of a wasm module.
///
/// # Errors
///
/// Returns [`RuntimeError::Load`] if the bytes are not a wasm module, the
/// manifest is malformed or declared twice, or it names an export the module
/// does not have.
pub fn inspect(path: &Path, bytes: &[u8]) -> RuntimeResult<UnitImage> {
    let mut exports = BTreeSet::new();
    let mut manifest_source: Option<String> = None;

    for payload in wasmparser::Parser::new(0).parse_all(bytes) {
        let payload =
            payload.map_err(|e| RuntimeError::load(path, format!("malformed wasm: {e}")))?;

        match payload {
            wasmparser::Payload::CustomSection(reader) if reader.name() == MANIFEST_SECTION => {
                if manifest_source.is_some() {
                    return Err(RuntimeError::load(
                        path,
                        format!("section '{MANIFEST_SECTION}' appears more than once"),
                    ));
                }
                let text = std::str::from_utf8(reader.data()).map_err(|e| {
                    RuntimeError::load(path, format!("manifest is not UTF-8: {e}"))
                })?;
                manifest_source = Some(text.to_string());
            },
            wasmparser::Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(|e| {
                        RuntimeError::load(path, format!("failed to read export: {e}"))
                    })?;
                    if export.kind == wasmparser::ExternalKind::Func {
                        exports.insert(export.name.to_string());
                    }
                }
            },
            _ => {},
        }
    }

    let manifest = match manifest_source {
        Some(source) => UnitManifest::from_toml(&source)
            .map_err(|e| RuntimeError::load(path, format!("invalid manifest: {e}")))?,
        None => UnitManifest::default(),
    };

    manifest
        .check(&exports)
        .map_err(|message| RuntimeError::load(path, message))?;

    Ok(UnitImage { manifest, exports })
}
