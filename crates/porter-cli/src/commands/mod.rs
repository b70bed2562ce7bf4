//! Command implementations.
//!
//! - [`build`] - compile all bundles to disk
//! - [`serve`] - development server with reloads

pub mod build;
pub mod serve;

use std::path::{Path, PathBuf};

use porter::PorterOptions;
use porter_config::PorterConfig;

use crate::error::{CliError, Result};

pub use build::execute as build_execute;
pub use serve::execute as serve_execute;

/// The project root: `--root` or the current directory.
pub(crate) fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let root = match root {
        Some(root) if root.is_absolute() => root.to_path_buf(),
        Some(root) => cwd.join(root),
        None => cwd,
    };
    if !root.is_dir() {
        return Err(CliError::RootNotFound(root));
    }
    Ok(root)
}

/// Discovered config of `root` resolved into engine options.
pub(crate) fn load_options(
    root: &Path,
    customize: impl FnOnce(&mut PorterConfig),
) -> Result<PorterOptions> {
    let mut config = porter_config::discover(root)?;
    config.root = Some(root.to_path_buf());
    customize(&mut config);
    Ok(PorterOptions::from_config(config)?)
}
