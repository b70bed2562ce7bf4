//! Subscriber setup for applications embedding porter.
//!
//! Only available with the `logging` feature. The engine emits `tracing`
//! events under the `porter` and `porter_config` targets; the filters built
//! here enable those targets (and `porter_cli`) at the requested level and
//! leave every other crate silent.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

const TARGETS: [&str; 3] = ["porter", "porter_config", "porter_cli"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Filter directives for this level. Errors surface from every crate;
    /// lower levels are scoped to porter's own targets.
    pub fn directives(self) -> String {
        match self {
            LogLevel::Silent | LogLevel::Error => self.as_str().to_string(),
            level => TARGETS
                .iter()
                .map(|target| format!("{target}={}", level.as_str()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silent" | "off" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("Invalid log level: {other}")),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`init_logging_with`] sets up the subscriber.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub level: LogLevel,
    /// A set `RUST_LOG` replaces the level's directives.
    pub respect_env: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            respect_env: true,
            ansi: true,
        }
    }
}

/// The filter `config` installs.
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    if config.respect_env {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::new(config.level.directives())
}

/// Install a compact stderr subscriber at `level`, honouring `RUST_LOG`.
///
/// ```rust,no_run
/// use porter::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    init_logging_with(LogConfig {
        level,
        ..LogConfig::default()
    });
}

/// Like [`init_logging`] with full control. Only the first call in a
/// process takes effect, and a subscriber installed by someone else wins.
pub fn init_logging_with(config: LogConfig) {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(config.ansi)
            .with_writer(std::io::stderr);

        let _ = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(fmt_layer)
            .try_init();
    });
}
