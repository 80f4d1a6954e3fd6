//! Tessera Telemetry - Logging for the Tessera module runtime.
//!
//! This crate provides:
//! - Process-wide subscriber setup with multiple formats and targets
//! - [`Logger`], a scoped handle passed explicitly to every component
//!
//! # Example
//!
//! ```rust,no_run
//! use tessera_telemetry::{LogConfig, LogFormat, Logger, setup_logging};
//!
//! # fn main() -> Result<(), tessera_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("extism=warn");
//!
//! setup_logging(&config)?;
//!
//! let logger = Logger::for_component("greeter", 3);
//! logger.info("component ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logger;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logger::{LogLevel, Logger};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
