//! The component lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Created from a unit; nothing discovered yet.
    Loaded,
    /// Discovery ran; providers are registered.
    Deployed,
    /// The start entry point has been launched.
    Started,
    /// The stop entry point has run.
    Stopped,
    /// Terminal.
    Deleted,
}

/// A lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Run discovery.
    Deploy,
    /// Launch the start entry point.
    Start,
    /// Cancel and run the stop entry point.
    Stop,
    /// Retire the component.
    Delete,
}

impl Operation {
    /// Every operation.
    pub const ALL: [Self; 4] = [Self::Deploy, Self::Start, Self::Stop, Self::Delete];
}

impl ComponentState {
    /// Every state.
    pub const ALL: [Self; 5] = [
        Self::Loaded,
        Self::Deployed,
        Self::Started,
        Self::Stopped,
        Self::Deleted,
    ];

    /// The state `op` leads to, or `None` if `op` is not supported here.
    #[must_use]
    pub fn next(self, op: Operation) -> Option<Self> {
        match (self, op) {
            (Self::Loaded, Operation::Deploy) => Some(Self::Deployed),
            (Self::Deployed, Operation::Start) => Some(Self::Started),
            (Self::Deployed | Self::Stopped, Operation::Delete) => Some(Self::Deleted),
            (Self::Started, Operation::Stop) => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Like [`next`](Self::next), but as an error naming the operation and state.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StateViolation`] if `op` is not supported.
    pub fn check(self, op: Operation) -> RuntimeResult<Self> {
        self.next(op).ok_or(RuntimeError::StateViolation {
            operation: op,
            state: self,
        })
    }

    /// Operations this state accepts.
    #[must_use]
    pub fn supported(self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.next(*op).is_some())
            .collect()
    }

    /// Whether no operation is accepted any more.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.supported().is_empty()
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "Loaded",
            Self::Deployed => "Deployed",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deploy => "deploy",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}
