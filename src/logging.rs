//! Structured logging setup.
//!
//! The engine itself only emits `tracing` events and spans; this module
//! is the optional convenience layer applications use to install a
//! subscriber. `RUST_LOG` overrides the configured level when set.

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Most detailed debugging information.
    Trace,
    /// Detailed debugging information.
    Debug,
    /// Important events.
    Info,
    /// Potential issues.
    Warn,
    /// Errors only.
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// Single-line output.
    Compact,
    /// JSON output for production environments.
    Json,
}

/// Log configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Whether to include the target module in each event.
    pub show_target: bool,
    /// Whether to include thread IDs.
    pub show_thread_ids: bool,
    /// Whether to emit span enter/close events.
    pub show_span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_target: true,
            show_thread_ids: false,
            show_span_events: false,
        }
    }
}

impl LogConfig {
    /// Configuration for development: debug level, pretty output, span
    /// events visible.
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: false,
            show_span_events: true,
        }
    }

    /// Configuration for production: info level, JSON output.
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            show_target: true,
            show_thread_ids: true,
            show_span_events: false,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), self.level))
        })
    }

    fn span_events(&self) -> FmtSpan {
        if self.show_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

macro_rules! install_layer {
    ($layer:expr, $config:expr, $lenient:expr) => {{
        let layer = $layer
            .with_target($config.show_target)
            .with_thread_ids($config.show_thread_ids)
            .with_span_events($config.span_events())
            .with_filter($config.env_filter());
        if $lenient {
            let _ = tracing_subscriber::registry().with(layer).try_init();
        } else {
            tracing_subscriber::registry().with(layer).init();
        }
    }};
}

fn install(config: &LogConfig, lenient: bool) {
    match config.format {
        LogFormat::Pretty => install_layer!(fmt::layer().pretty(), config, lenient),
        LogFormat::Compact => install_layer!(fmt::layer().compact(), config, lenient),
        LogFormat::Json => install_layer!(fmt::layer().json(), config, lenient),
    }
}

/// Installs the global tracing subscriber.
///
/// Panics if a subscriber is already installed; use
/// [`try_init_logging`] where double initialization is possible.
pub fn init_logging(config: &LogConfig) {
    install(config, false);
}

/// Installs the global tracing subscriber, ignoring an already-installed
/// one. Suitable for tests.
pub fn try_init_logging(config: &LogConfig) {
    install(config, true);
}
