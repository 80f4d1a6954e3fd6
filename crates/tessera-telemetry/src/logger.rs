//! Scoped logger handles.
//!
//! A [`Logger`] is handed to the orchestrator and to every component at
//! construction time. It carries nothing but its scope, so cloning is cheap
//! and there is no hidden global state to reach for.

use std::fmt;
use std::sync::Arc;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very verbose diagnostics.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that did not stop the operation.
    Warn,
    /// An operation failed.
    Error,
}

impl LogLevel {
    /// Parse a level name as emitted by guest code.
    ///
    /// Unknown names map to [`LogLevel::Info`] so a misbehaving unit can never
    /// suppress its own output.
    #[must_use]
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" | "err" | "severe" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// A named logging scope that forwards to `tracing`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Logger {
    scope: Arc<str>,
}

impl Logger {
    /// Create a logger with an arbitrary scope.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: Arc::from(scope.into()),
        }
    }

    /// Create the logger handed to a component, scoped `"<name>::<id>"`.
    #[must_use]
    pub fn for_component(name: &str, id: impl fmt::Display) -> Self {
        Self::new(format!("{name}::{id}"))
    }

    /// The scope this logger writes under.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Emit `message` at `level`.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        let scope = &*self.scope;
        match level {
            LogLevel::Trace => tracing::trace!(scope, "{message}"),
            LogLevel::Debug => tracing::debug!(scope, "{message}"),
            LogLevel::Info => tracing::info!(scope, "{message}"),
            LogLevel::Warn => tracing::warn!(scope, "{message}"),
            LogLevel::Error => tracing::error!(scope, "{message}"),
        }
    }

    /// Emit at trace level.
    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    /// Emit at debug level.
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    /// Emit at info level.
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    /// Emit at warn level.
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    /// Emit at error level.
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Logger").field(&self.scope()).finish()
    }
}

impl fmt::Display for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_component_scope_format() {
        let logger = Logger::for_component("greeter", 4);
        assert_eq!(logger.scope(), "greeter::4");
        assert_eq!(logger.to_string(), "greeter::4");
    }

    #[test]
    fn test_clones_share_scope() {
        let logger = Logger::new("runtime");
        let clone = logger.clone();
        assert_eq!(logger, clone);
        assert_ne!(logger, Logger::new("runtime::0"));
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(LogLevel::parse_lenient("TRACE"), LogLevel::Trace);
        assert_eq!(LogLevel::parse_lenient("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse_lenient(" err "), LogLevel::Error);
        assert_eq!(LogLevel::parse_lenient("severe"), LogLevel::Error);
        assert_eq!(LogLevel::parse_lenient("loud"), LogLevel::Info);
        assert_eq!(LogLevel::parse_lenient(""), LogLevel::Info);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_events_carry_scope_field() {
        let buf = std::sync::Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = buf.clone();
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .without_time()
            .with_writer(move || CaptureWriter(sink.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            Logger::for_component("clock", 2).warn("tick missed");
        });

        let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(out.contains("\"scope\":\"clock::2\""), "got: {out}");
        assert!(out.contains("tick missed"));
        assert!(out.contains("WARN"));
    }

    struct CaptureWriter(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
