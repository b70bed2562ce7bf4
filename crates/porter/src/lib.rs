#![cfg_attr(docsrs, feature(doc_cfg))]

//! # porter
//!
//! Browser module bundler: resolves CommonJS and ES module specifiers
//! against an installed package tree, transpiles and caches each file, and
//! assembles content-hashed bundles for a small client-side loader.
//!
//! ## Quick Start
//!
//! ```no_run
//! use porter::{Porter, PorterOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> porter::Result<()> {
//! let mut options = PorterOptions::new("./app")?;
//! options.entries = vec!["home.js".to_string()];
//!
//! let porter = Porter::new(options);
//! let manifest = porter.compile_all(&[]).await?;
//! for (entry, output) in &manifest {
//!     println!("{entry} -> {output}");
//! }
//! # Ok(()) }
//! ```
//!
//! Development servers hand requests to [`Porter::read_file`], which
//! builds bundles on demand, and call [`Porter::watch`] to reload edited
//! modules.

pub mod bundle;
pub mod cache;
pub mod constants;
mod engine;
pub mod error;
pub mod graph;
pub mod loader;
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;
pub mod module;
pub mod options;
pub mod packet;
pub mod runtime;
pub mod single_flight;
pub mod transpile;
mod watch;

pub use bundle::{Bundle, BundleOutput, BundleSpec, OutputProbe, Scope};
pub use cache::{Cache, CacheError, CacheIdentity, CacheRecord};
pub use constants::Format;
pub use engine::{
    CompileOptions, CompileOutput, EntrySource, FakeEntry, FileResponse, Porter, PorterBuilder,
    ReadQuery,
};
pub use error::{PorterError, Result};
pub use graph::{Graph, PacketIdx};
pub use module::{Module, ModuleIdx, ModuleKind, ModuleStatus};
pub use options::PorterOptions;
pub use packet::{Packet, Resolved};
pub use runtime::native::NativeRuntime;
pub use runtime::{FileMetadata, Runtime, RuntimeError};
pub use transpile::{TranspileError, TranspileInput, TranspileOutput, Transpiler};

pub use porter_config as config;
