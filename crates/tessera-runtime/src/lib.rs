//! Tessera Runtime - dynamic loading and lifecycle management of packaged units.
//!
//! A packaged unit is a WebAssembly module in a `.unit` file. Each load gets
//! its own [`ExecutionContext`]; nothing is shared between two loads of the
//! same file. The [`ModuleLoader`] turns a unit into a [`Component`] and, on
//! deploy, discovers the unit's capability providers, collaborator slots and
//! start/stop entry points. The [`RuntimeOrchestrator`] owns the
//! [`ComponentRegistry`] and drives components through
//! `Loaded → Deployed → Started → Stopped → Deleted`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessera_runtime::{CapabilityRegistry, ModuleLoader, RuntimeOrchestrator};
//!
//! # fn main() -> Result<(), tessera_runtime::RuntimeError> {
//! let loader = ModuleLoader::new(Arc::new(CapabilityRegistry::new()));
//! let runtime = RuntimeOrchestrator::new(loader);
//!
//! runtime.start()?;
//! let id = runtime.load_component("units/clock.unit")?;
//! runtime.deploy_by_id(id)?;
//! runtime.start_by_id(id)?;
//! for summary in runtime.list_components()? {
//!     println!("{summary}");
//! }
//! runtime.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod capability;
pub mod component;
pub mod context;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod unit;

mod host;

pub use capability::{Capability, CapabilityRegistry, WasmCapability};
pub use component::{
    Component, ComponentId, ComponentState, ComponentSummary, Operation, STOP_CALL_WAIT,
};
pub use context::{ContextId, ContextValue, ExecutionContext, ResolvedSymbol};
pub use error::{DiscoveryError, RuntimeError, RuntimeResult};
pub use loader::{DiscoveryResult, EntryPoints, ModuleLoader};
pub use manifest::{EntryKind, SlotKind, UnitManifest};
pub use orchestrator::RuntimeOrchestrator;
pub use registry::ComponentRegistry;
pub use unit::PackagedUnit;
