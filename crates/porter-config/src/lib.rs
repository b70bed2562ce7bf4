//! Configuration for the Porter bundler.
//!
//! Porter reads its settings from `porter.toml` or from the `"porter"` field
//! of `package.json`. Both are normalized into a [`PorterConfig`], which the
//! engine resolves against the project root before use.

pub mod config;
pub mod discovery;
pub mod error;

pub use config::*;
pub use discovery::{ConfigDiscovery, discover};
pub use error::{ConfigError, Result};
