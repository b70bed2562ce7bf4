//! Logging setup for the CLI.
//!
//! The engine only emits `tracing` events; this maps the global flags onto
//! [`porter::logging`] and installs its subscriber.
//!
//! ```rust,no_run
//! use porter_cli::logger::init_logger;
//! use tracing::info;
//!
//! init_logger(false, false, false);
//! info!("compiling");
//! ```

use porter::logging::{LogConfig, LogLevel, init_logging_with};

/// Subscriber settings for the global flags.
///
/// The level is chosen in this order:
/// 1. `--verbose`: DEBUG for porter crates
/// 2. `--quiet`: ERROR only
/// 3. `RUST_LOG`
/// 4. INFO for porter crates
pub fn log_config(verbose: bool, quiet: bool, no_color: bool) -> LogConfig {
    let level = if verbose {
        LogLevel::Debug
    } else if quiet {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    LogConfig {
        level,
        respect_env: !verbose && !quiet,
        ansi: !no_color,
    }
}

/// Install the global subscriber.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logging_with(log_config(verbose, quiet, no_color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_pick_the_level() {
        let verbose = log_config(true, false, false);
        assert_eq!(verbose.level, LogLevel::Debug);
        assert!(!verbose.respect_env);

        let quiet = log_config(false, true, true);
        assert_eq!(quiet.level, LogLevel::Error);
        assert!(!quiet.ansi);

        let default = log_config(false, false, false);
        assert_eq!(default.level, LogLevel::Info);
        assert!(default.respect_env);
    }
}
