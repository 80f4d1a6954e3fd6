//! Capability registry and round-robin dispatch.
//!
//! Providers are grouped by capability type key. Each group keeps a cursor
//! that advances on every [`CapabilityRegistry::resolve`] and wraps modulo
//! `count + 1`, not `count`. The extra slot maps back onto the first provider,
//! so with three providers a full cycle is `P0, P1, P2, P0` and the first
//! provider is served twice per cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::component::ComponentId;
use crate::context::{ContextId, WeakInstance};
use crate::error::{RuntimeError, RuntimeResult};

/// Something a unit offers to other units.
pub trait Capability: Send + Sync {
    /// Handle one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or is no longer available.
    fn invoke(&self, input: &[u8]) -> RuntimeResult<Vec<u8>>;

    /// Execution context the provider lives in, if it lives in one.
    fn origin(&self) -> Option<ContextId> {
        None
    }
}

/// A provider implemented by an export of a loaded unit.
pub struct WasmCapability {
    type_key: String,
    export: String,
    instance: WeakInstance,
}

impl WasmCapability {
    pub(crate) fn new(
        type_key: impl Into<String>,
        export: impl Into<String>,
        instance: WeakInstance,
    ) -> Self {
        Self {
            type_key: type_key.into(),
            export: export.into(),
            instance,
        }
    }

    /// Capability type key.
    #[must_use]
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    /// Export serving requests.
    #[must_use]
    pub fn export(&self) -> &str {
        &self.export
    }
}

impl Capability for WasmCapability {
    fn invoke(&self, input: &[u8]) -> RuntimeResult<Vec<u8>> {
        let instance = self.instance.upgrade().ok_or_else(|| {
            RuntimeError::invocation(
                self.instance.label(),
                &self.export,
                "the providing component has been unloaded",
            )
        })?;
        instance.call(&self.export, input)
    }

    fn origin(&self) -> Option<ContextId> {
        Some(self.instance.context_id())
    }
}

impl fmt::Debug for WasmCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmCapability")
            .field("type_key", &self.type_key)
            .field("export", &self.export)
            .field("context", &self.instance.context_id())
            .finish_non_exhaustive()
    }
}

struct ProviderSlot {
    owner: Option<ComponentId>,
    provider: Arc<dyn Capability>,
}

#[derive(Default)]
struct ProviderGroup {
    providers: Vec<ProviderSlot>,
    cursor: usize,
}

impl ProviderGroup {
    /// Provider under the cursor, then advance.
    fn next(&mut self) -> Option<Arc<dyn Capability>> {
        let len = self.providers.len();
        let index = self.cursor.checked_rem(len)?;
        let provider = self.providers.get(index)?.provider.clone();
        self.cursor = self
            .cursor
            .checked_add(1)
            .zip(len.checked_add(1))
            .and_then(|(next, modulus)| next.checked_rem(modulus))
            .unwrap_or(0);
        Some(provider)
    }
}

/// Providers grouped by capability type, handed out round-robin.
///
/// All operations take `&self`; the cursor is advanced under a lock so two
/// concurrent callers never observe the same position.
#[derive(Default)]
pub struct CapabilityRegistry {
    groups: Mutex<BTreeMap<String, ProviderGroup>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, BTreeMap<String, ProviderGroup>> {
        // Every mutation below leaves the map consistent, so a poisoned lock
        // still guards valid data.
        self.groups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append a provider that no component owns.
    ///
    /// Returns the provider's position within its type group.
    pub fn register(&self, type_key: impl Into<String>, provider: Arc<dyn Capability>) -> usize {
        self.insert(type_key.into(), None, provider)
    }

    /// Append a provider owned by `owner`; removed again by
    /// [`unregister_owner`](Self::unregister_owner).
    pub fn register_owned(
        &self,
        owner: ComponentId,
        type_key: impl Into<String>,
        provider: Arc<dyn Capability>,
    ) -> usize {
        self.insert(type_key.into(), Some(owner), provider)
    }

    fn insert(
        &self,
        type_key: String,
        owner: Option<ComponentId>,
        provider: Arc<dyn Capability>,
    ) -> usize {
        let mut groups = self.groups();
        let group = groups.entry(type_key.clone()).or_default();
        group.providers.push(ProviderSlot { owner, provider });
        let position = group.providers.len().saturating_sub(1);
        debug!(capability = %type_key, position, "Registered capability provider");
        position
    }

    /// Next provider for `type_key`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CapabilityNotFound`] if nothing is registered
    /// under `type_key`.
    pub fn resolve(&self, type_key: &str) -> RuntimeResult<Arc<dyn Capability>> {
        self.groups()
            .get_mut(type_key)
            .and_then(ProviderGroup::next)
            .ok_or_else(|| RuntimeError::CapabilityNotFound(type_key.to_string()))
    }

    /// Remove every provider owned by `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: ComponentId) -> usize {
        let mut groups = self.groups();
        let mut removed = 0usize;

        groups.retain(|type_key, group| {
            let before = group.providers.len();
            group.providers.retain(|slot| slot.owner != Some(owner));
            let gone = before.saturating_sub(group.providers.len());
            removed = removed.saturating_add(gone);

            if gone > 0 {
                debug!(capability = %type_key, %owner, gone, "Removed capability providers");
            }
            if group.cursor > group.providers.len() {
                group.cursor = 0;
            }
            !group.providers.is_empty()
        });

        if removed > 0 {
            info!(%owner, removed, "Unregistered capability providers");
        }
        removed
    }

    /// Number of providers registered under `type_key`.
    #[must_use]
    pub fn provider_count(&self, type_key: &str) -> usize {
        self.groups().get(type_key).map_or(0, |g| g.providers.len())
    }

    /// All type keys with at least one provider, sorted.
    #[must_use]
    pub fn type_keys(&self) -> Vec<String> {
        self.groups().keys().cloned().collect()
    }

    /// Whether no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups().is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = self.groups();
        f.debug_struct("CapabilityRegistry")
            .field("type_count", &groups.len())
            .field("types", &groups.keys().collect::<Vec<_>>())
            .finish()
    }
}
