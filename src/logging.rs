//! Logging setup and scoped loggers.
//!
//! This module provides:
//! - Subscriber initialization for the binary, writing to stderr so that
//!   `--json` output on stdout stays machine-readable
//! - Configurable log levels via `RUST_LOG` or programmatic configuration
//! - [`LogScope`], a scope name threaded explicitly through components
//!   instead of a shared global logger

use std::fmt as std_fmt;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warning level
    Warn,
    /// Error level - least verbose
    Error,
    /// Disable logging entirely
    Off,
}

impl From<u8> for LogLevel {
    /// Convert verbosity count to log level.
    /// 0 = Info, 1 = Debug, 2+ = Trace
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Configuration for the subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: LogLevel,
    /// Whether events carry their source file and line
    pub source_location: bool,
}

impl LoggingConfig {
    /// Create a new logging configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set whether events carry their source file and line.
    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }

    fn directive(&self) -> &'static str {
        match self.level {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

/// Initialize the global subscriber with the given configuration.
///
/// Call once at the start of the binary. The library never calls this.
/// Repeated calls are ignored.
///
/// # Examples
///
/// ```no_run
/// use reviewflow::logging::{init_logging, LoggingConfig, LogLevel};
///
/// init_logging(
///     LoggingConfig::new()
///         .with_level(LogLevel::Debug)
///         .with_source_location(true),
/// );
/// ```
pub fn init_logging(config: LoggingConfig) {
    // RUST_LOG wins over the configured level
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.directive())
    };

    // try_init: a second initialization is a no-op rather than a panic
    let _ = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .try_init();
}

/// A named logging scope passed explicitly to components.
///
/// Events emitted by a component carry its scope as a `scope` field, and
/// child scopes extend the name with a `.` separator (`runner.sequential`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogScope {
    name: String,
}

impl Default for LogScope {
    fn default() -> Self {
        Self::new("reviewflow")
    }
}

impl LogScope {
    /// Creates a root scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Creates a nested scope.
    pub fn child(&self, name: &str) -> Self {
        Self {
            name: format!("{}.{}", self.name, name),
        }
    }

    /// The full scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a span carrying the scope name.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("scope", name = %self.name)
    }
}

impl std_fmt::Display for LogScope {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_scope_child_names() {
        let root = LogScope::new("runner");
        let child = root.child("sequential");
        assert_eq!(child.name(), "runner.sequential");
        assert_eq!(child.child("queue").to_string(), "runner.sequential.queue");
        assert_eq!(root.name(), "runner");
    }

    #[test]
    fn test_log_level_deserializes_lowercase() {
        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
    }

    #[test]
    fn test_log_level_from_verbosity() {
        assert!(matches!(LogLevel::from(0), LogLevel::Info));
        assert!(matches!(LogLevel::from(1), LogLevel::Debug));
        assert!(matches!(LogLevel::from(2), LogLevel::Trace));
        assert!(matches!(LogLevel::from(10), LogLevel::Trace));
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Debug)
            .with_source_location(true);

        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.source_location);
        assert_eq!(config.directive(), "debug");
        assert!(!LoggingConfig::default().source_location);
    }

    #[test]
    fn test_directive_for_every_level() {
        let levels = [
            (LogLevel::Trace, "trace"),
            (LogLevel::Warn, "warn"),
            (LogLevel::Off, "off"),
        ];
        for (level, directive) in levels {
            assert_eq!(LoggingConfig::new().with_level(level).directive(), directive);
        }
    }
}
