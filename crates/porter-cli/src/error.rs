//! Error handling for the CLI.
//!
//! Every variant renders with a `Hint:` line telling the user what to try
//! next. [`cli_error_to_miette`] turns them into reports at the top level.

use std::path::PathBuf;

use porter::PorterError;
use porter_config::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(
        "Configuration error: {0}\n\nHint: Check porter.toml or the \"porter\" field of package.json"
    )]
    Config(#[from] ConfigError),

    #[error("Build error: {0}\n\nHint: {hint}", hint = build_hint(.0))]
    Build(#[from] PorterError),

    #[error("Project root not found: {}\n\nHint: Pass an existing directory with --root", .0.display())]
    RootNotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Server error: {0}\n\nHint: Check that the port is free or pick another with --port")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn build_hint(error: &PorterError) -> &'static str {
    match error {
        PorterError::UnresolvedRelative { .. } => {
            "Check the relative path and that the file exists with a configured extension"
        }
        PorterError::UnparsedEntry { .. } => {
            "Entries are looked up in the configured paths (default: components/)"
        }
        PorterError::UnknownDependency(_) => {
            "Every package in bundle.exclude must be installed under node_modules"
        }
        PorterError::InvalidPackage { .. } => "Every package needs a package.json with a name",
        PorterError::ParseFailure { .. } | PorterError::Transpile(_) => {
            "Fix the syntax error above, or register a transpiler for this file type"
        }
        PorterError::BundleEmpty { .. } => "Make sure the entry contains code for this format",
        _ => "Run with --verbose for details",
    }
}

pub fn cli_error_to_miette(err: CliError) -> miette::Report {
    match err {
        CliError::Build(e) => miette::miette!("Build failed: {}\n\nHint: {}", e, build_hint(&e)),
        _ => miette::miette!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_hints() {
        let err = CliError::from(PorterError::UnknownDependency("react".to_string()));
        let message = err.to_string();
        assert!(message.starts_with("Build error: unable to find package react"));
        assert!(message.contains("Hint: Every package in bundle.exclude"));

        let err = CliError::RootNotFound(PathBuf::from("/nowhere"));
        assert!(err.to_string().contains("--root"));
    }

    #[test]
    fn converts_to_report() {
        let report = cli_error_to_miette(CliError::InvalidArgument("bad".to_string()));
        assert_eq!(report.to_string(), "Invalid argument: bad");
    }
}
