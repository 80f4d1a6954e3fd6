//! Unit loading and discovery.
//!
//! [`ModuleLoader::load`] builds a fresh [`ExecutionContext`] per call.
//! [`ModuleLoader::discover`] reads what the unit declared and acts on it:
//!
//! 1. collaborator slots are populated (logger, capability lookup)
//! 2. providers are instantiated in declaration order and, once all of them
//!    succeeded, registered with the [`CapabilityRegistry`]
//! 3. start/stop candidates are classified into at most one pair
//!
//! Discovery never calls a start or stop procedure.

use std::sync::Arc;

use tessera_config::SandboxConfig;
use tessera_telemetry::Logger;
use tracing::debug;

use crate::capability::{CapabilityRegistry, WasmCapability};
use crate::component::{Component, ComponentId};
use crate::context::ExecutionContext;
use crate::error::{DiscoveryError, RuntimeResult};
use crate::manifest::{EntryKind, SlotKind, UnitManifest};
use crate::unit::PackagedUnit;

/// The start/stop pair of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoints {
    /// Export run on a new thread by `start`.
    pub start: String,
    /// Export run on the caller's thread by `stop`.
    pub stop: String,
}

/// What a discovery pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Lifecycle hooks, if exactly one pair was declared.
    pub entry_points: Option<EntryPoints>,
    /// Capability type keys registered, in declaration order.
    pub providers: Vec<String>,
    /// Slot kinds populated.
    pub slots: Vec<SlotKind>,
    /// Problems with the entry-point declarations.
    pub warnings: Vec<DiscoveryError>,
}

/// Pick the lifecycle hooks out of a manifest.
///
/// Zero candidates of both kinds is fine. Anything other than exactly one of
/// each is reported and yields no hooks.
pub(crate) fn classify_entry_points(
    manifest: &UnitManifest,
) -> Result<Option<EntryPoints>, DiscoveryError> {
    let starts: Vec<String> = manifest
        .entries_of(EntryKind::Start)
        .map(str::to_string)
        .collect();
    let stops: Vec<String> = manifest
        .entries_of(EntryKind::Stop)
        .map(str::to_string)
        .collect();

    if starts.len() > 1 {
        return Err(DiscoveryError::AmbiguousStart(starts));
    }
    if stops.len() > 1 {
        return Err(DiscoveryError::AmbiguousStop(stops));
    }

    match (starts.into_iter().next(), stops.into_iter().next()) {
        (Some(start), Some(stop)) => Ok(Some(EntryPoints { start, stop })),
        (Some(start), None) => Err(DiscoveryError::MissingStop { start }),
        (None, Some(stop)) => Err(DiscoveryError::MissingStart { stop }),
        (None, None) => Ok(None),
    }
}

/// Builds components from units and runs their discovery pass.
pub struct ModuleLoader {
    sandbox: SandboxConfig,
    capabilities: Arc<CapabilityRegistry>,
}

impl ModuleLoader {
    /// Create a loader registering providers into `capabilities`.
    #[must_use]
    pub fn new(capabilities: Arc<CapabilityRegistry>) -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            capabilities,
        }
    }

    /// Use these sandbox limits for every context.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// The registry providers go into.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Sandbox limits in use.
    #[must_use]
    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    /// Build a new isolated context for `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`](crate::RuntimeError::Load) if the unit
    /// cannot be read or instantiated.
    pub fn load(&self, unit: &PackagedUnit) -> RuntimeResult<ExecutionContext> {
        ExecutionContext::load(unit, &self.sandbox)
    }

    /// Build a `Loaded` component with id `id`.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn create_component(
        &self,
        id: ComponentId,
        unit: &PackagedUnit,
    ) -> RuntimeResult<Component> {
        let context = self.load(unit)?;
        Ok(Component::new(id, context))
    }

    /// Run the discovery pass for component `owner`.
    ///
    /// Entry-point problems are logged through `logger` and returned in
    /// [`DiscoveryResult::warnings`]; they do not fail discovery.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Invocation`](crate::RuntimeError::Invocation)
    /// if a provider's init export fails. Nothing is registered in that case.
    pub fn discover(
        &self,
        owner: ComponentId,
        context: &ExecutionContext,
        logger: &Logger,
    ) -> RuntimeResult<DiscoveryResult> {
        let manifest = context.manifest();
        let mut result = DiscoveryResult::default();

        context.with_host(|host| {
            host.scope = logger.scope().to_string();
            host.logger = manifest.wants(SlotKind::Logger).then(|| logger.clone());
            host.capabilities = manifest
                .wants(SlotKind::Capabilities)
                .then(|| self.capabilities.clone());
        })?;
        for slot in &manifest.slots {
            debug!(scope = %logger, slot = %slot.slot, kind = ?slot.kind, "Populated slot");
            result.slots.push(slot.kind);
        }

        let mut providers = Vec::with_capacity(manifest.providers.len());
        for decl in &manifest.providers {
            if let Some(init) = &decl.init {
                context.call(init, &[]).inspect_err(|e| {
                    logger.error(format!(
                        "provider '{}' failed to initialize: {e}",
                        decl.type_key
                    ));
                })?;
            }
            let provider = WasmCapability::new(
                &decl.type_key,
                &decl.export,
                context.instance().downgrade(),
            );
            providers.push((decl.type_key.clone(), provider));
        }

        for (type_key, provider) in providers {
            self.capabilities
                .register_owned(owner, type_key.clone(), Arc::new(provider));
            logger.debug(format!("registered provider for '{type_key}'"));
            result.providers.push(type_key);
        }

        match classify_entry_points(manifest) {
            Ok(entry_points) => result.entry_points = entry_points,
            Err(warning) => {
                logger.warn(format!("lifecycle hooks disabled: {warning}"));
                result.warnings.push(warning);
            },
        }

        Ok(result)
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("sandbox", &self.sandbox)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(entries: &[(&str, &str)]) -> UnitManifest {
        let doc: String = entries
            .iter()
            .map(|(kind, export)| format!("[[entry]]\nkind = \"{kind}\"\nexport = \"{export}\"\n"))
            .collect();
        UnitManifest::from_toml(&doc).unwrap()
    }

    #[test]
    fn test_no_entries_is_valid() {
        assert_eq!(classify_entry_points(&manifest(&[])), Ok(None));
    }

    #[test]
    fn test_one_pair() {
        let found = classify_entry_points(&manifest(&[("stop", "halt"), ("start", "run")]));
        assert_eq!(
            found,
            Ok(Some(EntryPoints {
                start: "run".into(),
                stop: "halt".into(),
            }))
        );
    }

    #[test]
    fn test_start_without_stop() {
        assert_eq!(
            classify_entry_points(&manifest(&[("start", "run")])),
            Err(DiscoveryError::MissingStop {
                start: "run".into()
            })
        );
    }

    #[test]
    fn test_stop_without_start() {
        assert_eq!(
            classify_entry_points(&manifest(&[("stop", "halt")])),
            Err(DiscoveryError::MissingStart {
                stop: "halt".into()
            })
        );
    }

    #[test]
    fn test_two_starts_is_ambiguous() {
        let found = classify_entry_points(&manifest(&[
            ("start", "run"),
            ("start", "run_again"),
            ("stop", "halt"),
        ]));
        assert_eq!(
            found,
            Err(DiscoveryError::AmbiguousStart(vec![
                "run".into(),
                "run_again".into()
            ]))
        );
    }

    #[test]
    fn test_two_stops_is_ambiguous() {
        let found = classify_entry_points(&manifest(&[
            ("start", "run"),
            ("stop", "halt"),
            ("stop", "halt_again"),
        ]));
        assert!(matches!(found, Err(DiscoveryError::AmbiguousStop(v)) if v.len() == 2));
    }

    #[test]
    fn test_loader_defaults() {
        let loader = ModuleLoader::new(Arc::new(CapabilityRegistry::new()));
        assert_eq!(loader.sandbox(), &SandboxConfig::default());
        assert!(loader.capabilities().is_empty());
    }
}
