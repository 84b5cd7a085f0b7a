//! Tracing and logging setup.
//!
//! Logs go to stderr so that command output on stdout (for example
//! `simulate --json`) stays machine readable. The configured level applies
//! to the `rewind*` crates; everything else logs at `dependency_level`.
//! `REWIND_LOG` overrides both with a full `EnvFilter` directive string.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "REWIND_LOG";

/// Targets that follow the configured level.
const CRATE_TARGETS: &[&str] = &[
    "rewind",
    "rewind_cache",
    "rewind_config",
    "rewind_filter",
    "rewind_metrics",
];

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the cache crates.
    pub level: Level,

    /// Level for everything else.
    pub dependency_level: Level,

    /// Output format.
    pub format: LogFormat,

    /// Log span open/close events.
    pub span_events: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One human-readable line per event.
    Text,

    /// One JSON object per event, fields flattened.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to text.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            format: LogFormat::Text,
            span_events: false,
        }
    }
}

/// Parses a log level name, falling back to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Builds the default filter directives for `config`.
///
/// `LogConfig { level: DEBUG, dependency_level: WARN, .. }` yields
/// `warn,rewind=debug,rewind_cache=debug,...`.
pub fn directives(config: &LogConfig) -> String {
    let level = config.level.as_str().to_ascii_lowercase();
    let mut out = config.dependency_level.as_str().to_ascii_lowercase();
    for target in CRATE_TARGETS {
        out.push_str(&format!(",{target}={level}"));
    }
    out
}

/// Installs the global subscriber.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(directives(config)));

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let installed = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(span_events),
            )
            .try_init(),
    };
    installed.is_ok()
}
