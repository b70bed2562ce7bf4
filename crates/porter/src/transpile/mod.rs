//! Transpiler seams and the built-in script/style processors.
//!
//! Syntax transpilers (Babel-like script compilers, Less/Sass preprocessors)
//! are external collaborators plugged in through [`Transpiler`]. The engine
//! itself only minifies scripts with oxc and normalizes stylesheets with
//! lightningcss.

pub mod script;
pub mod style;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use script::{ScriptOutput, minify_script, parse_failure_message};
pub use style::{StyleOutput, transform_style};

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error("failed to transpile script {path}: {message}")]
    Script { path: PathBuf, message: String },

    #[error("failed to transpile stylesheet {path}: {message}")]
    Style { path: PathBuf, message: String },

    #[error("{name} failed on {path}: {message}")]
    External {
        name: String,
        path: PathBuf,
        message: String,
    },
}

/// Input handed to a pluggable transpiler.
#[derive(Debug, Clone)]
pub struct TranspileInput {
    pub code: String,
    pub map: Option<Value>,
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Path relative to the project root, used in source maps.
    pub source_name: String,
    pub minify: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TranspileOutput {
    pub code: String,
    pub map: Option<Value>,
}

/// A pluggable source-to-source compiler.
///
/// Returning `Ok(None)` means "not mine", and the source passes through
/// untouched.
#[async_trait]
pub trait Transpiler: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Options that influence output; part of the cache salt.
    fn options(&self) -> Value {
        Value::Null
    }

    async fn transpile(&self, input: TranspileInput)
    -> Result<Option<TranspileOutput>, TranspileError>;
}

/// Registered transpilers, shared by every packet of one engine.
#[derive(Debug, Clone, Default)]
pub struct Transpilers {
    /// Script compiler used by the root packet and `transpile.include`.
    pub script: Option<Arc<dyn Transpiler>>,
    /// Stylesheet preprocessors keyed by extension (`.less`, `.scss`, ...).
    pub styles: BTreeMap<String, Arc<dyn Transpiler>>,
}

impl Transpilers {
    pub fn style(&self, ext: &str) -> Option<&Arc<dyn Transpiler>> {
        self.styles.get(ext)
    }
}
