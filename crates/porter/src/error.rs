//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::runtime::RuntimeError;
use crate::transpile::TranspileError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, PorterError>;

#[derive(Debug, Error)]
pub enum PorterError {
    /// A relative specifier of a real module points at nothing.
    #[error("unable to resolve '{specifier}' imported by {from}")]
    UnresolvedRelative { specifier: String, from: PathBuf },

    /// A bundle was asked for an entry that was never parsed.
    #[error("unparsed entry {entry} ({dir})")]
    UnparsedEntry { entry: String, dir: PathBuf },

    /// Compiling a bundle whose output name is empty.
    #[error("empty bundle {entry_path}: no entry resolved to code")]
    BundleEmpty { entry_path: String },

    #[error("unable to find package {0}")]
    UnknownDependency(String),

    #[error("failed to parse {path}: {message}")]
    ParseFailure { path: PathBuf, message: String },

    #[error("invalid package.json in {dir}: {message}")]
    InvalidPackage { dir: PathBuf, message: String },

    #[error(transparent)]
    Transpile(#[from] TranspileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] porter_config::ConfigError),

    #[error("file watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Io(String),
}

impl PorterError {
    pub(crate) fn parse_failure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PorterError::ParseFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error means "nothing there" rather than "broken".
    pub fn is_not_found(&self) -> bool {
        match self {
            PorterError::Runtime(e) => e.is_not_found(),
            PorterError::UnknownDependency(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PorterError {
    fn from(e: serde_json::Error) -> Self {
        PorterError::Io(format!("JSON error: {e}"))
    }
}
