//! Porter CLI - compile browser bundles and serve them in development.
//!
//! - [`cli`] - argument definitions
//! - [`commands`] - `build` and `serve`
//! - [`error`] - error types with actionable hints
//! - [`logger`] - tracing subscriber setup
//! - [`server`] - the development HTTP server over [`porter::Porter::read_file`]
//! - [`ui`] - terminal status messages

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod server;
pub mod ui;

pub use error::{CliError, Result};
