//! Components: one loaded unit plus its lifecycle.

mod state;

pub use state::{ComponentState, Operation};

use std::fmt;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_telemetry::Logger;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::loader::{DiscoveryResult, EntryPoints, ModuleLoader};
use crate::unit::PackagedUnit;

/// Attempts `stop` waits for a cooperative exit before interrupting.
const STOP_GRACE_ATTEMPTS: u32 = 20;

/// Pause between checks on the start thread.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the stop procedure waits for a busy service instance.
pub const STOP_CALL_WAIT: Duration = Duration::from_secs(2);

/// Registry-assigned component identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ComponentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// The running start entry point.
struct EntryTask {
    handle: JoinHandle<()>,
}

impl EntryTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// A loaded, lifecycle-managed instance of a unit.
pub struct Component {
    id: ComponentId,
    name: String,
    context: ExecutionContext,
    logger: Logger,
    entry_points: Option<EntryPoints>,
    state: ComponentState,
    task: Option<EntryTask>,
    loaded_at: DateTime<Utc>,
}

impl Component {
    pub(crate) fn new(id: ComponentId, context: ExecutionContext) -> Self {
        let name = context.unit().name().to_string();
        Self {
            logger: Logger::for_component(&name, id),
            id,
            name,
            context,
            entry_points: None,
            state: ComponentState::Loaded,
            task: None,
            loaded_at: Utc::now(),
        }
    }

    /// Registry id.
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit this component was loaded from.
    #[must_use]
    pub fn unit(&self) -> &PackagedUnit {
        self.context.unit()
    }

    /// The component's private execution context.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Logger scoped `"<name>::<id>"`.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Start/stop pair found by discovery, if any.
    #[must_use]
    pub fn entry_points(&self) -> Option<&EntryPoints> {
        self.entry_points.as_ref()
    }

    /// Current state. Never has side effects.
    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// When the component was created.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Whether the start entry point is still executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(EntryTask::is_running)
    }

    /// Run discovery and move to `Deployed`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StateViolation`] unless the component is
    /// `Loaded`, or [`RuntimeError::Invocation`] if a provider fails to
    /// initialize; the component then stays `Loaded`.
    pub fn deploy(&mut self, loader: &ModuleLoader) -> RuntimeResult<DiscoveryResult> {
        let next = self.state.check(Operation::Deploy)?;

        let discovery = loader.discover(self.id, &self.context, &self.logger)?;
        self.entry_points = discovery.entry_points.clone();
        self.state = next;

        info!(
            component_id = %self.id,
            name = %self.name,
            providers = discovery.providers.len(),
            hooks = self.entry_points.is_some(),
            "Deployed component"
        );
        Ok(discovery)
    }

    /// Launch the start entry point on its own thread and move to `Started`.
    ///
    /// Returns as soon as the thread is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StateViolation`] unless the component is
    /// `Deployed`, [`RuntimeError::Invocation`] if the context has no start
    /// instance, or [`RuntimeError::Io`] if the thread cannot be spawned.
    pub fn start(&mut self) -> RuntimeResult<()> {
        let next = self.state.check(Operation::Start)?;

        if let Some(entry) = &self.entry_points {
            let instance = self
                .context
                .entry_instance()
                .ok_or_else(|| {
                    RuntimeError::invocation(&self.name, &entry.start, "no start instance")
                })?
                .clone();
            let cancel = self.context.cancel_token();
            let logger = self.logger.clone();
            let export = entry.start.clone();

            let handle = std::thread::Builder::new()
                .name(format!("tessera-{}-{}", self.name, self.id))
                .spawn(move || {
                    match instance.call_unless_cancelled(&export, &[], &cancel) {
                        Ok(Some(_)) => logger.info(format!("start procedure '{export}' returned")),
                        Ok(None) => logger.debug("stop requested before start procedure ran"),
                        Err(e) if cancel.is_cancelled() => {
                            logger.debug(format!("start procedure ended by stop: {e}"));
                        },
                        Err(e) => logger.error(format!("start procedure failed: {e}")),
                    }
                })?;
            self.task = Some(EntryTask { handle });
        }

        self.state = next;
        info!(component_id = %self.id, name = %self.name, "Started component");
        Ok(())
    }

    /// Request cancellation, run the stop entry point and move to `Stopped`.
    ///
    /// The stop procedure runs on the caller's thread against the service
    /// instance, so a start procedure that never returns cannot hold it up.
    /// A start procedure that ignores `tessera_cancelled` is interrupted
    /// after a short grace period. The start thread is not joined.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StateViolation`] unless the component is
    /// `Started`, or [`RuntimeError::Invocation`] if the stop procedure fails
    /// or the service instance stays busy for [`STOP_CALL_WAIT`]; the
    /// component then stays `Started`.
    pub fn stop(&mut self) -> RuntimeResult<()> {
        let next = self.state.check(Operation::Stop)?;

        self.context.request_cancel();

        if let Some(entry) = &self.entry_points {
            let result = self
                .context
                .instance()
                .call_within(&entry.stop, &[], STOP_CALL_WAIT);
            if let Err(e) = result {
                self.logger.error(format!("stop procedure failed: {e}"));
                return Err(e);
            }
        }

        if let Some(task) = &self.task {
            self.interrupt_after_grace(task);
        }
        self.state = next;
        info!(component_id = %self.id, name = %self.name, "Stopped component");
        Ok(())
    }

    fn interrupt_after_grace(&self, task: &EntryTask) {
        for _ in 0..STOP_GRACE_ATTEMPTS {
            if !task.is_running() {
                return;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        if task.is_running() {
            debug!(unit = %self.name, component_id = %self.id, "Interrupting start procedure");
            self.context.interrupt();
        }
    }

    /// Move to `Deleted`.
    ///
    /// Capability providers are not touched here; the orchestrator removes
    /// them from the registry it owns.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StateViolation`] unless the component is
    /// `Deployed` or `Stopped`.
    pub fn delete(&mut self) -> RuntimeResult<()> {
        let next = self.state.check(Operation::Delete)?;
        if self.is_running() {
            warn!(
                component_id = %self.id,
                "Deleting component while its start thread is still running"
            );
        }
        self.state = next;
        info!(component_id = %self.id, name = %self.name, "Deleted component");
        Ok(())
    }

    /// Snapshot of the identifying fields.
    #[must_use]
    pub fn summary(&self) -> ComponentSummary {
        ComponentSummary {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            unit_path: self.unit().path().to_path_buf(),
            loaded_at: self.loaded_at,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("entry_points", &self.entry_points)
            .finish_non_exhaustive()
    }
}

/// One line of a component listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSummary {
    /// Registry id.
    pub id: ComponentId,
    /// Unit name.
    pub name: String,
    /// Lifecycle state.
    pub state: ComponentState,
    /// Unit the component was loaded from.
    pub unit_path: PathBuf,
    /// Creation time.
    pub loaded_at: DateTime<Utc>,
}

impl fmt::Display for ComponentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}, Name: {}, State: {}", self.id, self.name, self.state)
    }
}
