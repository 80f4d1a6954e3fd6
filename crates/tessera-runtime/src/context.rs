//! Isolated execution contexts.
//!
//! Every load of a unit compiles and instantiates the module afresh. The
//! resulting [`ExecutionContext`] owns its own wasm instances, host state and
//! identity, so nothing produced through one context can be confused with
//! what another context produces, even for two loads of the same file.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, TryLockError, Weak};
use std::time::{Duration, Instant};

use extism::{Manifest, PluginBuilder, UserData, Wasm};
use tessera_config::SandboxConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RuntimeError, RuntimeResult};
use crate::host::{HostState, register_host_functions};
use crate::manifest::{self, EntryKind, UnitManifest};
use crate::unit::PackagedUnit;

/// Size of one wasm memory page.
const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Pause between attempts to acquire a busy instance.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Unique identity of one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A symbol looked up through a specific context.
///
/// Two lookups of the same name through different contexts yield symbols
/// that compare unequal and refuse to run against each other's context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSymbol {
    context: ContextId,
    name: String,
}

impl ResolvedSymbol {
    /// Symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context the symbol was resolved through.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Build a value of this symbol's type.
    #[must_use]
    pub fn construct(&self, payload: impl Into<Vec<u8>>) -> ContextValue {
        ContextValue {
            origin: self.context,
            symbol: self.name.clone(),
            payload: payload.into(),
        }
    }
}

/// A value tagged with the context whose symbol produced it.
///
/// Equality includes the origin: structurally identical values from two
/// contexts are never equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextValue {
    origin: ContextId,
    symbol: String,
    payload: Vec<u8>,
}

impl ContextValue {
    /// Context the value was produced in.
    #[must_use]
    pub fn origin(&self) -> ContextId {
        self.origin
    }

    /// Name of the symbol that produced it.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Raw payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Shared handle to one of a context's wasm instances.
///
/// An instance executes one call at a time; callers queue on its lock.
#[derive(Clone)]
pub(crate) struct Instance {
    context: ContextId,
    label: Arc<str>,
    plugin: Arc<Mutex<extism::Plugin>>,
}

impl Instance {
    /// Call `export`, waiting for any call already in progress.
    pub(crate) fn call(&self, export: &str, input: &[u8]) -> RuntimeResult<Vec<u8>> {
        let mut plugin = self.plugin.lock().map_err(|e| {
            RuntimeError::invocation(&*self.label, export, format!("instance lock poisoned: {e}"))
        })?;
        self.call_locked(&mut plugin, export, input)
    }

    /// Call `export` unless `cancel` has fired by the time the instance is
    /// free. Returns `None` when the call was skipped.
    pub(crate) fn call_unless_cancelled(
        &self,
        export: &str,
        input: &[u8],
        cancel: &CancellationToken,
    ) -> RuntimeResult<Option<Vec<u8>>> {
        let mut plugin = self.plugin.lock().map_err(|e| {
            RuntimeError::invocation(&*self.label, export, format!("instance lock poisoned: {e}"))
        })?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        self.call_locked(&mut plugin, export, input).map(Some)
    }

    /// Call `export` once the instance is idle, giving up after `wait`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Invocation`] if the instance stays busy for
    /// longer than `wait`, or if the export is missing or fails.
    pub(crate) fn call_within(
        &self,
        export: &str,
        input: &[u8],
        wait: Duration,
    ) -> RuntimeResult<Vec<u8>> {
        let deadline = Instant::now().checked_add(wait);
        loop {
            match self.plugin.try_lock() {
                Ok(mut plugin) => return self.call_locked(&mut plugin, export, input),
                Err(TryLockError::WouldBlock) => {
                    if deadline.is_none_or(|d| Instant::now() >= d) {
                        return Err(RuntimeError::invocation(
                            &*self.label,
                            export,
                            format!("instance still busy after {wait:?}"),
                        ));
                    }
                    std::thread::sleep(IDLE_POLL_INTERVAL);
                },
                Err(TryLockError::Poisoned(e)) => {
                    return Err(RuntimeError::invocation(
                        &*self.label,
                        export,
                        format!("instance lock poisoned: {e}"),
                    ));
                },
            }
        }
    }

    fn call_locked(
        &self,
        plugin: &mut extism::Plugin,
        export: &str,
        input: &[u8],
    ) -> RuntimeResult<Vec<u8>> {
        if !plugin.function_exists(export) {
            return Err(RuntimeError::invocation(
                &*self.label,
                export,
                "no such export",
            ));
        }
        debug!(unit = %self.label, context = %self.context, export, "Calling export");
        plugin
            .call::<&[u8], Vec<u8>>(export, input)
            .map_err(|e| RuntimeError::invocation(&*self.label, export, format!("{e:?}")))
    }

    pub(crate) fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            context: self.context,
            label: self.label.clone(),
            plugin: Arc::downgrade(&self.plugin),
        }
    }
}

/// Non-owning handle held by capability providers.
///
/// Only the owning [`ExecutionContext`] keeps the instance alive.
#[derive(Clone)]
pub(crate) struct WeakInstance {
    context: ContextId,
    label: Arc<str>,
    plugin: Weak<Mutex<extism::Plugin>>,
}

impl WeakInstance {
    pub(crate) fn upgrade(&self) -> Option<Instance> {
        self.plugin.upgrade().map(|plugin| Instance {
            context: self.context,
            label: self.label.clone(),
            plugin,
        })
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.context
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }
}

/// The instance reserved for a unit's start procedure.
struct EntryInstance {
    instance: Instance,
    cancel_handle: extism::CancelHandle,
}

/// The isolated scope created for one load of a unit.
///
/// A context owns up to two instances of the module, both private to it and
/// both wired to the same host state. The service instance runs provider
/// exports, initializers and the stop procedure. Units that declare a start
/// procedure get a second instance for it, so a long-running start never
/// holds the service instance.
pub struct ExecutionContext {
    id: ContextId,
    unit: PackagedUnit,
    digest: blake3::Hash,
    manifest: UnitManifest,
    exports: BTreeSet<String>,
    instance: Instance,
    entry: Option<EntryInstance>,
    host: Arc<Mutex<HostState>>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Read, inspect and instantiate `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`] if the unit cannot be read, is not a
    /// valid wasm module, carries a malformed manifest, or fails to
    /// instantiate.
    pub fn load(unit: &PackagedUnit, sandbox: &SandboxConfig) -> RuntimeResult<Self> {
        let bytes = unit.read_bytes()?;
        let digest = blake3::hash(&bytes);
        let image = manifest::inspect(unit.path(), &bytes)?;

        let id = ContextId::new();
        let host_state = HostState::new(id, unit.name());
        let cancel = host_state.cancel.clone();
        let user_data = UserData::new(host_state);
        let host = user_data.get().map_err(|e| {
            RuntimeError::load(unit.path(), format!("failed to prepare host state: {e}"))
        })?;

        let mut extism_manifest = Manifest::new([Wasm::data(bytes)]);
        // Pages are 64 KB; clamp very large byte limits.
        let pages = sandbox
            .memory_limit_bytes
            .checked_div(WASM_PAGE_SIZE)
            .unwrap_or(0);
        extism_manifest = extism_manifest.with_memory_max(u32::try_from(pages).unwrap_or(u32::MAX));
        if let Some(timeout) = sandbox.call_timeout() {
            extism_manifest = extism_manifest.with_timeout(timeout);
        }

        let label: Arc<str> = Arc::from(unit.name());
        let instantiate = || -> RuntimeResult<extism::Plugin> {
            let builder = PluginBuilder::new(extism_manifest.clone()).with_wasi(sandbox.wasi);
            register_host_functions(builder, &user_data).build().map_err(|e| {
                RuntimeError::load(unit.path(), format!("failed to instantiate unit: {e}"))
            })
        };

        let instance = Instance {
            context: id,
            label: label.clone(),
            plugin: Arc::new(Mutex::new(instantiate()?)),
        };
        let entry = if image.manifest.entries_of(EntryKind::Start).next().is_some() {
            let plugin = instantiate()?;
            Some(EntryInstance {
                cancel_handle: plugin.cancel_handle(),
                instance: Instance {
                    context: id,
                    label,
                    plugin: Arc::new(Mutex::new(plugin)),
                },
            })
        } else {
            None
        };

        info!(
            unit = %unit.name(),
            context = %id,
            digest = %digest.to_hex(),
            exports = image.exports.len(),
            entry_instance = entry.is_some(),
            "Created execution context"
        );

        Ok(Self {
            id,
            unit: unit.clone(),
            digest,
            manifest: image.manifest,
            exports: image.exports,
            instance,
            entry,
            host,
            cancel,
        })
    }

    /// This context's identity.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The unit this context was built from.
    #[must_use]
    pub fn unit(&self) -> &PackagedUnit {
        &self.unit
    }

    /// BLAKE3 digest of the unit bytes, hex encoded.
    #[must_use]
    pub fn digest(&self) -> String {
        self.digest.to_hex().to_string()
    }

    /// The unit's declared manifest.
    #[must_use]
    pub fn manifest(&self) -> &UnitManifest {
        &self.manifest
    }

    /// Names of the unit's exported functions.
    #[must_use]
    pub fn exports(&self) -> &BTreeSet<String> {
        &self.exports
    }

    /// Look up an exported function or a declared capability type.
    #[must_use]
    pub fn resolve_symbol(&self, name: &str) -> Option<ResolvedSymbol> {
        let known = self.exports.contains(name)
            || self.manifest.providers.iter().any(|p| p.type_key == name);
        known.then(|| ResolvedSymbol {
            context: self.id,
            name: name.to_string(),
        })
    }

    /// Run an exported function resolved through this context.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Invocation`] if the symbol was resolved
    /// through another context, is not a function, or the call fails.
    pub fn call_symbol(&self, symbol: &ResolvedSymbol, input: &[u8]) -> RuntimeResult<Vec<u8>> {
        if symbol.context != self.id {
            return Err(RuntimeError::invocation(
                self.unit.name(),
                &symbol.name,
                format!(
                    "symbol belongs to context {}, not {}",
                    symbol.context, self.id
                ),
            ));
        }
        self.instance.call(&symbol.name, input)
    }

    /// Run `export`, waiting for any call already in progress.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Invocation`] if the export is missing or fails.
    pub fn call(&self, export: &str, input: &[u8]) -> RuntimeResult<Vec<u8>> {
        self.instance.call(export, input)
    }

    /// The service instance.
    pub(crate) fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The instance that runs the start procedure, when one is declared.
    pub(crate) fn entry_instance(&self) -> Option<&Instance> {
        self.entry.as_ref().map(|entry| &entry.instance)
    }

    /// Apply `f` to the host state seen by this context's imports.
    pub(crate) fn with_host<R>(&self, f: impl FnOnce(&mut HostState) -> R) -> RuntimeResult<R> {
        let mut state = self
            .host
            .lock()
            .map_err(|e| RuntimeError::LockPoisoned(format!("host state: {e}")))?;
        Ok(f(&mut state))
    }

    /// Ask a cooperative start procedure to return.
    pub(crate) fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the start procedure if it is executing guest code.
    ///
    /// A start procedure blocked inside a host call traps once the call
    /// returns to the guest.
    pub(crate) fn interrupt(&self) {
        let Some(entry) = &self.entry else {
            return;
        };
        if let Err(e) = entry.cancel_handle.cancel() {
            debug!(unit = %self.unit.name(), context = %self.id, error = %e, "Interrupt failed");
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("unit", &self.unit.name())
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        assert_ne!(ContextId::new(), ContextId::new());
    }

    #[test]
    fn test_values_from_same_symbol_are_equal() {
        let symbol = ResolvedSymbol {
            context: ContextId::new(),
            name: "greeting".into(),
        };
        assert_eq!(symbol.construct("hi"), symbol.construct("hi"));
        assert_ne!(symbol.construct("hi"), symbol.construct("bye"));
    }

    #[test]
    fn test_values_across_contexts_never_equal() {
        let a = ResolvedSymbol {
            context: ContextId::new(),
            name: "greeting".into(),
        };
        let b = ResolvedSymbol {
            context: ContextId::new(),
            name: "greeting".into(),
        };
        assert_ne!(a, b);

        let (va, vb) = (a.construct("hi"), b.construct("hi"));
        assert_eq!(va.payload(), vb.payload());
        assert_eq!(va.symbol(), vb.symbol());
        assert_ne!(va, vb);
    }
}
