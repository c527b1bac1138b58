//! Diagnostic logging setup for the library and its consumers
//!
//! This is the crate's own diagnostics (construction, teardown, chain
//! promotion events emitted through `tracing`), not the log-message
//! pipeline modeled by [`crate::logmsg`]. Initialization is idempotent; the
//! first caller wins.

use std::io;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with timestamps.
    Pretty,
    /// Compact format for production.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Log output destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// File with daily rotation.
    File { directory: String, prefix: String },
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Output destination.
    pub output: LogOutput,
    /// Custom filter directives (e.g. "keel=debug").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Initialize the global logging system.
///
/// Returns a `WorkerGuard` that must be kept alive for the duration of the
/// program to ensure all logs are flushed; `None` if logging was already
/// initialized.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    if INITIALIZED.set(()).is_err() {
        return None;
    }

    let filter = build_filter(&config);
    let (writer, guard) = match &config.output {
        LogOutput::Stdout => {
            tracing_appender::non_blocking(Box::new(io::stdout()) as Box<dyn io::Write + Send>)
        }
        LogOutput::Stderr => {
            tracing_appender::non_blocking(Box::new(io::stderr()) as Box<dyn io::Write + Send>)
        }
        LogOutput::File { directory, prefix } => tracing_appender::non_blocking(
            Box::new(rolling::daily(directory, prefix)) as Box<dyn io::Write + Send>,
        ),
    };

    match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer().with_writer(writer).pretty().with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer().with_writer(writer).compact().with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
        }
        LogFormat::Json => {
            let layer = fmt::layer().with_writer(writer).json().with_filter(filter);
            tracing_subscriber::registry().with(layer).init();
        }
    }
    Some(guard)
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::from_default_env().add_directive(config.level.into());
    match &config.filter {
        Some(directives) => directives.split(',').fold(base, |filter, directive| {
            match directive.parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => filter,
            }
        }),
        None => base,
    }
}

/// Initialize logging with defaults for development.
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(
        LogConfig::new()
            .with_level(Level::DEBUG)
            .with_filter("keel=trace"),
    )
}

/// Initialize logging with defaults for production.
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(
        LogConfig::new()
            .with_format(LogFormat::Json)
            .with_output(LogOutput::File {
                directory: log_dir.as_ref().to_string_lossy().to_string(),
                prefix: "keel".to_string(),
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_filter("keel=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter, Some("keel=trace".to_string()));
    }
}
