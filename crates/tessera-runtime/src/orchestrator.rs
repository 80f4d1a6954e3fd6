//! The runtime orchestrator.
//!
//! [`RuntimeOrchestrator`] owns the [`ComponentRegistry`] and exposes the
//! lifecycle operations by id. Every failure is logged through the runtime
//! logger and returned to the caller, so bulk operations can carry on past a
//! single bad component.
//!
//! Locking: the registry sits behind an `RwLock` and each component behind its
//! own `Mutex`. The registry lock is never held while guest code runs; only
//! the lock of the component being operated on is.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_config::{
    CoarseState, ConfigSnapshot, ConfigStore, JsonConfigStore, RuntimeConfig, SnapshotEntry,
    read_snapshot_file, write_snapshot_file,
};
use tessera_telemetry::Logger;
use tracing::{debug, warn};

use crate::capability::CapabilityRegistry;
use crate::component::{Component, ComponentId, ComponentState, ComponentSummary};
use crate::error::{RuntimeError, RuntimeResult};
use crate::loader::ModuleLoader;
use crate::registry::{ComponentRegistry, SharedComponent};
use crate::unit::PackagedUnit;

/// Owns the component registry and drives component lifecycles.
pub struct RuntimeOrchestrator {
    running: AtomicBool,
    registry: RwLock<ComponentRegistry>,
    loader: ModuleLoader,
    logger: Logger,
    store: Box<dyn ConfigStore>,
    snapshot_path: Option<PathBuf>,
}

impl RuntimeOrchestrator {
    /// Create a stopped orchestrator that does not persist snapshots.
    #[must_use]
    pub fn new(loader: ModuleLoader) -> Self {
        Self {
            running: AtomicBool::new(false),
            registry: RwLock::new(ComponentRegistry::new()),
            loader,
            logger: Logger::new("runtime"),
            store: Box::new(JsonConfigStore::new()),
            snapshot_path: None,
        }
    }

    /// Build an orchestrator from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let loader = ModuleLoader::new(Arc::new(CapabilityRegistry::new()))
            .with_sandbox(config.sandbox.clone());
        let orchestrator = Self::new(loader).with_store(Box::new(JsonConfigStore::new().pretty()));
        match &config.runtime.snapshot_path {
            Some(path) => orchestrator.with_snapshot_path(path),
            None => orchestrator,
        }
    }

    /// Serialize snapshots with `store`.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn ConfigStore>) -> Self {
        self.store = store;
        self
    }

    /// Persist a snapshot to `path` after every structural change.
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Log runtime events through `logger`.
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// The loader used to build components.
    #[must_use]
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// The capability registry providers are registered into.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        self.loader.capabilities()
    }

    /// Where snapshots are persisted, if anywhere.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Whether [`start`](Self::start) has been called without a successful
    /// [`shutdown`](Self::shutdown) since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the runtime as running.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyRunning`] if it already is.
    pub fn start(&self) -> RuntimeResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.logger.error("runtime is already running");
            return Err(RuntimeError::AlreadyRunning);
        }
        self.logger.info("runtime started");
        Ok(())
    }

    /// Load a unit as a new `Loaded` component.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], or [`RuntimeError::Load`] if the
    /// unit cannot be resolved or instantiated. No id is consumed on failure.
    pub fn load_component(&self, path: impl AsRef<Path>) -> RuntimeResult<ComponentId> {
        let path = path.as_ref();
        let id = self
            .insert_unit(path)
            .inspect_err(|e| self.logger.error(format!("failed to load {}: {e}", path.display())))?;
        self.persist();
        Ok(id)
    }

    /// Load every `.unit` file directly inside `dir`, in file name order.
    ///
    /// Entries without the `.unit` extension are ignored. Units that fail to
    /// load are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], or [`RuntimeError::Io`] if the
    /// directory cannot be listed.
    pub fn load_all(&self, dir: impl AsRef<Path>) -> RuntimeResult<Vec<ComponentId>> {
        self.ensure_running()?;
        let dir = dir.as_ref();

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && PackagedUnit::is_unit_path(&path) {
                paths.push(path);
            } else {
                debug!(path = %path.display(), "Skipping non-unit entry");
            }
        }
        paths.sort();

        let mut ids = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.insert_unit(path) {
                Ok(id) => ids.push(id),
                Err(e) => self
                    .logger
                    .error(format!("skipping {}: {e}", path.display())),
            }
        }
        self.persist();

        self.logger.info(format!(
            "loaded {} of {} units from {}",
            ids.len(),
            paths.len(),
            dir.display()
        ));
        Ok(ids)
    }

    /// Deploy a component and return the id of the deployed component.
    ///
    /// A component that is no longer `Loaded` is left alone; a fresh copy is
    /// loaded from the same unit under a new id and that copy is deployed.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], [`RuntimeError::ComponentNotFound`],
    /// [`RuntimeError::Load`] if the copy cannot be loaded, or
    /// [`RuntimeError::Invocation`] if a provider fails to initialize.
    pub fn deploy_by_id(&self, id: ComponentId) -> RuntimeResult<ComponentId> {
        self.ensure_running()?;
        let result = self.deploy_inner(id);
        self.persist();
        result.inspect_err(|e| self.logger.error(format!("deploy of component {id} failed: {e}")))
    }

    fn deploy_inner(&self, id: ComponentId) -> RuntimeResult<ComponentId> {
        let component = self.component(id)?;

        let clone_from = {
            let guard = lock(&component)?;
            (guard.state() != ComponentState::Loaded).then(|| guard.unit().clone())
        };

        let (target_id, target) = match clone_from {
            None => (id, component),
            Some(unit) => {
                let clone_id = self
                    .registry_write()?
                    .insert_with(|new_id| self.loader.create_component(new_id, &unit))?;
                self.logger.info(format!(
                    "component {id} is not Loaded; deploying a fresh copy as {clone_id}"
                ));
                (clone_id, self.component(clone_id)?)
            },
        };

        lock(&target)?.deploy(&self.loader)?;
        Ok(target_id)
    }

    /// Start a `Deployed` component.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], [`RuntimeError::ComponentNotFound`],
    /// or [`RuntimeError::StateViolation`].
    pub fn start_by_id(&self, id: ComponentId) -> RuntimeResult<()> {
        self.with_component(id, "start", Component::start)
    }

    /// Stop a `Started` component.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], [`RuntimeError::ComponentNotFound`],
    /// [`RuntimeError::StateViolation`], or [`RuntimeError::Invocation`] if
    /// the stop procedure fails.
    pub fn stop_by_id(&self, id: ComponentId) -> RuntimeResult<()> {
        self.with_component(id, "stop", Component::stop)
    }

    /// Delete a component and remove it from the registry.
    ///
    /// A `Started` component is stopped first. Its capability providers are
    /// unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], [`RuntimeError::ComponentNotFound`],
    /// [`RuntimeError::StateViolation`] for a `Loaded` component, or the stop
    /// error if stopping first fails; the component then stays registered.
    pub fn delete_by_id(&self, id: ComponentId) -> RuntimeResult<()> {
        self.ensure_running()?;
        self.delete_inner(id)
            .inspect_err(|e| self.logger.error(format!("delete of component {id} failed: {e}")))?;
        self.persist();
        Ok(())
    }

    fn delete_inner(&self, id: ComponentId) -> RuntimeResult<()> {
        let component = self.component(id)?;
        {
            let mut guard = lock(&component)?;
            if guard.state() == ComponentState::Started {
                guard.stop()?;
            }
            guard.delete()?;
        }
        self.capabilities().unregister_owner(id);
        self.registry_write()?.remove(id)?;
        self.logger.info(format!("deleted component {id}"));
        Ok(())
    }

    /// Summaries of all registered components, ascending by id.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::LockPoisoned`] if a lock was poisoned.
    pub fn list_components(&self) -> RuntimeResult<Vec<ComponentSummary>> {
        self.components()?
            .iter()
            .map(|component| -> RuntimeResult<ComponentSummary> {
                Ok(lock(component)?.summary())
            })
            .collect()
    }

    /// Number of registered components.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::LockPoisoned`] if the registry lock was poisoned.
    pub fn component_count(&self) -> RuntimeResult<usize> {
        Ok(self.registry_read()?.len())
    }

    /// State of one component.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ComponentNotFound`] for an unknown id.
    pub fn state_of(&self, id: ComponentId) -> RuntimeResult<ComponentState> {
        let component = self.component(id)?;
        Ok(lock(&component)?.state())
    }

    /// Coarse description of the registry, ascending by id.
    ///
    /// `Started` and `Stopped` components are recorded as `DEPLOYED`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::LockPoisoned`] if a lock was poisoned.
    pub fn snapshot(&self) -> RuntimeResult<ConfigSnapshot> {
        self.components()?
            .iter()
            .map(|component| -> RuntimeResult<SnapshotEntry> {
                let guard = lock(component)?;
                let state = match guard.state() {
                    ComponentState::Loaded => CoarseState::Loaded,
                    _ => CoarseState::Deployed,
                };
                Ok(SnapshotEntry::new(guard.unit().path(), state))
            })
            .collect()
    }

    /// Write the current snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] if serialization or the write fails.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        let bytes = self.store.save(&self.snapshot()?)?;
        write_snapshot_file(path.as_ref(), &bytes)?;
        Ok(())
    }

    /// Replace every component with the ones described by the snapshot at
    /// `path`. Returns how many components were recreated.
    ///
    /// The snapshot is parsed before anything is touched. Current components
    /// are then stopped and deleted (`Loaded` ones are dropped), and each
    /// entry is loaded in order and deployed if marked `DEPLOYED`. Entries
    /// that fail are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], or [`RuntimeError::Config`] if
    /// the snapshot cannot be read or parsed.
    pub fn load_config(&self, path: impl AsRef<Path>) -> RuntimeResult<usize> {
        self.ensure_running()?;
        let path = path.as_ref();
        let snapshot = read_snapshot_file(path)
            .and_then(|bytes| self.store.load(&bytes))
            .inspect_err(|e| self.logger.error(format!("cannot apply snapshot: {e}")))?;
        self.logger.info(format!(
            "applying snapshot {} with {} components",
            path.display(),
            snapshot.len()
        ));

        let existing = self.registry_read()?.ids();
        for id in existing {
            if let Err(e) = self.retire(id) {
                self.logger
                    .warn(format!("component {id} could not be removed: {e}"));
            }
        }

        let mut recreated = 0usize;
        for entry in snapshot.iter() {
            let id = match self.insert_unit(&entry.unit_path) {
                Ok(id) => id,
                Err(e) => {
                    self.logger.error(format!(
                        "skipping snapshot entry {}: {e}",
                        entry.unit_path.display()
                    ));
                    continue;
                },
            };
            recreated = recreated.saturating_add(1);

            if entry.state == CoarseState::Deployed {
                if let Err(e) = self.deploy_loaded(id) {
                    self.logger
                        .error(format!("component {id} could not be deployed: {e}"));
                }
            }
        }

        self.persist();
        self.logger.info(format!("recreated {recreated} components"));
        Ok(recreated)
    }

    fn deploy_loaded(&self, id: ComponentId) -> RuntimeResult<()> {
        let component = self.component(id)?;
        let mut guard = lock(&component)?;
        guard.deploy(&self.loader)?;
        Ok(())
    }

    /// Remove a component during [`load_config`](Self::load_config).
    fn retire(&self, id: ComponentId) -> RuntimeResult<()> {
        let loaded = self.state_of(id)? == ComponentState::Loaded;
        if loaded {
            self.registry_write()?.remove(id)?;
            debug!(component_id = %id, "Dropped loaded component");
            Ok(())
        } else {
            self.delete_inner(id)
        }
    }

    /// Stop every `Started` component in ascending id order, then clear the
    /// registry and mark the runtime as not running.
    ///
    /// If a stop fails, shutdown aborts: every component stays registered and
    /// the runtime stays running so the call can be retried. Component ids
    /// are not reset and no snapshot is written.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`], or
    /// [`RuntimeError::ShutdownAborted`] naming the component that failed.
    pub fn shutdown(&self) -> RuntimeResult<()> {
        if !self.is_running() {
            self.logger.error("runtime is not running");
            return Err(RuntimeError::NotRunning);
        }
        self.logger.info("shutting down runtime");

        for (id, component) in self.entries()? {
            let mut guard = lock(&component)?;
            if guard.state() != ComponentState::Started {
                continue;
            }
            if let Err(e) = guard.stop() {
                self.logger
                    .error(format!("shutdown aborted: component {id} failed to stop: {e}"));
                return Err(RuntimeError::ShutdownAborted {
                    id,
                    source: Box::new(e),
                });
            }
        }

        let mut registry = self.registry_write()?;
        for id in registry.ids() {
            self.capabilities().unregister_owner(id);
        }
        registry.clear();
        drop(registry);

        self.running.store(false, Ordering::SeqCst);
        self.logger.info("runtime shut down");
        Ok(())
    }

    fn ensure_running(&self) -> RuntimeResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RuntimeError::NotRunning)
        }
    }

    fn insert_unit(&self, path: &Path) -> RuntimeResult<ComponentId> {
        self.ensure_running()?;
        let unit = PackagedUnit::resolve(path)?;
        let id = self
            .registry_write()?
            .insert_with(|id| self.loader.create_component(id, &unit))?;
        self.logger
            .info(format!("loaded component {id} from {}", unit.path().display()));
        Ok(id)
    }

    fn with_component(
        &self,
        id: ComponentId,
        operation: &str,
        f: impl FnOnce(&mut Component) -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        let result = self.ensure_running().and_then(|()| {
            let component = self.component(id)?;
            let mut guard = lock(&component)?;
            f(&mut *guard)
        });
        match &result {
            Ok(()) => debug!(component_id = %id, operation, "Component operation succeeded"),
            Err(e) => self
                .logger
                .error(format!("{operation} of component {id} failed: {e}")),
        }
        result
    }

    fn component(&self, id: ComponentId) -> RuntimeResult<SharedComponent> {
        self.registry_read()?.get(id)
    }

    /// Handles to every component, ascending by id.
    fn entries(&self) -> RuntimeResult<Vec<(ComponentId, SharedComponent)>> {
        Ok(self
            .registry_read()?
            .iter()
            .map(|(id, component)| (id, component.clone()))
            .collect())
    }

    fn components(&self) -> RuntimeResult<Vec<SharedComponent>> {
        Ok(self.entries()?.into_iter().map(|(_, c)| c).collect())
    }

    fn registry_read(&self) -> RuntimeResult<RwLockReadGuard<'_, ComponentRegistry>> {
        self.registry
            .read()
            .map_err(|e| RuntimeError::LockPoisoned(format!("component registry: {e}")))
    }

    fn registry_write(&self) -> RuntimeResult<RwLockWriteGuard<'_, ComponentRegistry>> {
        self.registry
            .write()
            .map_err(|e| RuntimeError::LockPoisoned(format!("component registry: {e}")))
    }

    /// Write the snapshot to the configured path. Failures are only logged.
    fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        match self.save_snapshot(path) {
            Ok(()) => debug!(path = %path.display(), "Persisted snapshot"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to persist snapshot"),
        }
    }
}

fn lock(component: &SharedComponent) -> RuntimeResult<MutexGuard<'_, Component>> {
    component
        .lock()
        .map_err(|e| RuntimeError::LockPoisoned(format!("component: {e}")))
}

impl std::fmt::Debug for RuntimeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOrchestrator")
            .field("running", &self.is_running())
            .field("snapshot_path", &self.snapshot_path)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}
