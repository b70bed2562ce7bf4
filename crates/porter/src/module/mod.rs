//! One source file in the graph.
//!
//! Modules are plain data stored in the engine's arena and addressed by
//! [`ModuleIdx`]. Edges are indices, so import cycles need no special
//! ownership handling. The async parse/obtain lifecycle lives on the engine.

pub mod envify;
pub mod imports;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheRecord;
use crate::constants::{extname, replace_ext};
use crate::graph::PacketIdx;

pub use envify::{Env, envify};
pub use imports::{ImportScan, scan_script, scan_style};

/// Handle of a module in the engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdx(pub(crate) usize);

impl ModuleIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Variant of a module, fixed at construction by file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    Script,
    Stylesheet {
        /// CSS modules: class names are scoped and exported to scripts.
        scoped: bool,
        /// `.less`, `.scss` or `.sass`; needs a registered preprocessor.
        preprocessor: Option<String>,
    },
    Json,
    Wasm,
    /// Files the engine does not understand, including `.d.ts`.
    Stub,
}

impl ModuleKind {
    pub fn from_file(file: &str) -> Self {
        let ext = extname(file);
        match ext {
            ".css" | ".less" | ".scss" | ".sass" => ModuleKind::Stylesheet {
                scoped: file.ends_with(&format!(".module{ext}")),
                preprocessor: (ext != ".css").then(|| ext.to_string()),
            },
            ".json" => ModuleKind::Json,
            ".wasm" => ModuleKind::Wasm,
            ".ts" if file.ends_with(".d.ts") => ModuleKind::Stub,
            ".js" | ".jsx" | ".ts" | ".tsx" | ".mjs" | ".cjs" => ModuleKind::Script,
            _ => ModuleKind::Stub,
        }
    }

    /// Bundled on its own rather than into dependents.
    pub fn is_isolated(&self) -> bool {
        matches!(self, ModuleKind::Wasm)
    }

    pub fn is_stylesheet(&self) -> bool {
        matches!(self, ModuleKind::Stylesheet { .. })
    }

    pub fn is_scoped_stylesheet(&self) -> bool {
        matches!(self, ModuleKind::Stylesheet { scoped: true, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleStatus {
    Init,
    Loading,
    Loaded,
}

/// Loader segments of a specifier, e.g. `worker-loader?inline=1!./w.js`.
pub type Loaders = BTreeMap<String, BTreeMap<String, String>>;

pub const WORKER_LOADER: &str = "worker-loader";

/// Split `loader?query!...!specifier?query` into the bare specifier and
/// its loaders. The specifier's own query is dropped; a `worker` key in it
/// selects the worker loader.
pub fn parse_loaders(specifier: &str) -> (String, Loaders) {
    let mut loaders = Loaders::new();
    let mut segments: Vec<&str> = specifier.split('!').collect();
    let last = segments.pop().unwrap_or_default();

    for segment in segments {
        let (name, query) = segment.split_once('?').unwrap_or((segment, ""));
        loaders.insert(name.to_string(), parse_query(query));
    }

    let (dep, query) = last.split_once('?').unwrap_or((last, ""));
    if parse_query(query).contains_key("worker") {
        loaders.entry(WORKER_LOADER.to_string()).or_default();
    }

    (dep.to_string(), loaders)
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.to_string(), value.to_string())
        })
        .collect()
}

/// Id of `file` as the client loader addresses it.
///
/// Compiled script extensions collapse to `.js`; files outside the root
/// packet are prefixed with `name/version/`.
pub fn module_id(file: &str, packet: Option<(&str, &str)>) -> String {
    let file = match extname(file) {
        ".jsx" | ".ts" | ".tsx" if !file.ends_with(".d.ts") => replace_ext(file, ".js"),
        _ => file.to_string(),
    };
    match packet {
        Some((name, version)) => format!("{name}/{version}/{file}"),
        None => file,
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    pub id: String,
    /// Path relative to the owning packet's search path, with the resolved
    /// suffix.
    pub file: String,
    pub fpath: PathBuf,
    pub packet: PacketIdx,
    pub kind: ModuleKind,
    pub status: ModuleStatus,
    pub imports: Vec<String>,
    pub dynamic_imports: Vec<String>,
    pub children: Vec<ModuleIdx>,
    pub dynamic_children: Vec<ModuleIdx>,
    /// Modules pulled in through the worker loader; they head bundles of
    /// their own.
    pub workers: Vec<ModuleIdx>,
    pub loaders: Loaders,
    pub cache: Option<Arc<CacheRecord>>,
    pub esm: bool,
    pub is_preload: bool,
    pub preloaded: bool,
    /// Programmatically injected with explicit imports and code.
    pub fake: bool,
    pub fake_code: Option<String>,
    /// Modification time (ms) of the last reload.
    pub reloaded: Option<u64>,
}

impl Module {
    pub fn new(id: String, file: String, fpath: PathBuf, packet: PacketIdx) -> Self {
        let kind = ModuleKind::from_file(&file);
        Self {
            id,
            file,
            fpath,
            packet,
            kind,
            status: ModuleStatus::Init,
            imports: Vec::new(),
            dynamic_imports: Vec::new(),
            children: Vec::new(),
            dynamic_children: Vec::new(),
            workers: Vec::new(),
            loaders: Loaders::new(),
            cache: None,
            esm: false,
            is_preload: false,
            preloaded: false,
            fake: false,
            fake_code: None,
            reloaded: None,
        }
    }

    pub fn is_worker(&self) -> bool {
        self.loaders.contains_key(WORKER_LOADER)
    }

    pub fn is_loaded(&self) -> bool {
        self.status == ModuleStatus::Loaded
    }

    pub(crate) fn add_child(&mut self, child: ModuleIdx) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn add_dynamic_child(&mut self, child: ModuleIdx) {
        if !self.dynamic_children.contains(&child) {
            self.dynamic_children.push(child);
        }
    }

    pub(crate) fn add_worker(&mut self, worker: ModuleIdx) {
        if !self.workers.contains(&worker) {
            self.workers.push(worker);
        }
    }
}
