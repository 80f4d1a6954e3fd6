//! Error types for the runtime.

use std::path::PathBuf;

use thiserror::Error;

use crate::component::{ComponentId, ComponentState, Operation};

/// Errors returned by lifecycle, loading and dispatch operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A unit could not be resolved, read, or instantiated.
    #[error("failed to load unit {path}: {message}")]
    Load {
        /// Path of the unit.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The operation is not legal in the component's current state.
    #[error("operation '{operation}' is not supported in state {state}")]
    StateViolation {
        /// The attempted operation.
        operation: Operation,
        /// The state the component is (still) in.
        state: ComponentState,
    },

    /// No component with this id is registered.
    #[error("component {0} not found")]
    ComponentNotFound(ComponentId),

    /// No provider is registered under this capability type.
    #[error("no provider registered for capability '{0}'")]
    CapabilityNotFound(String),

    /// Guest code failed while running a start, stop or provider export.
    #[error("{component}: call to '{export}' failed: {message}")]
    Invocation {
        /// Component (or unit) name the export belongs to.
        component: String,
        /// Export that was called.
        export: String,
        /// Failure reported by the engine.
        message: String,
    },

    /// The orchestrator has not been started, or has been shut down.
    #[error("runtime is not running")]
    NotRunning,

    /// `start` was called on a running orchestrator.
    #[error("runtime is already running")]
    AlreadyRunning,

    /// Shutdown stopped at the first component that failed to stop.
    #[error("shutdown aborted: component {id} failed to stop: {source}")]
    ShutdownAborted {
        /// Component whose stop failed.
        id: ComponentId,
        /// Why it failed.
        #[source]
        source: Box<RuntimeError>,
    },

    /// Every component id has been handed out.
    #[error("component id space exhausted")]
    IdsExhausted,

    /// A shared lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Configuration or snapshot error.
    #[error(transparent)]
    Config(#[from] tessera_config::ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub(crate) fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invocation(
        component: impl Into<String>,
        export: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Invocation {
            component: component.into(),
            export: export.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Problems with a unit's start/stop declarations.
///
/// These never fail a deploy. They are logged as warnings and the component
/// is deployed without lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// A stop procedure was declared without a start procedure.
    #[error("stop procedure '{stop}' has no matching start procedure")]
    MissingStart {
        /// The declared stop export.
        stop: String,
    },

    /// A start procedure was declared without a stop procedure.
    #[error("start procedure '{start}' has no matching stop procedure")]
    MissingStop {
        /// The declared start export.
        start: String,
    },

    /// More than one start procedure was declared.
    #[error("more than one start procedure declared: {}", .0.join(", "))]
    AmbiguousStart(Vec<String>),

    /// More than one stop procedure was declared.
    #[error("more than one stop procedure declared: {}", .0.join(", "))]
    AmbiguousStop(Vec<String>),
}
