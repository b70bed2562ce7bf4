//! Deterministic aggregation of an entry's closure into one output file.
//!
//! A bundle is registered on its packet under its `outkey`. Everything that
//! depends on the produced code (`contenthash`, `output`) is derived lazily
//! and cleared together with the code on invalidation.

pub mod sourcemap;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::constants::{Format, replace_ext};
use crate::error::{PorterError, Result};
use crate::graph::{Graph, PacketIdx};
use crate::module::{ModuleIdx, ModuleKind};
use crate::single_flight::SingleFlight;

/// How far a bundle's traversal may cross packet boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The entry module alone.
    Module,
    /// Modules of the entry's packet.
    Packet,
    /// Everything reachable, dependencies included.
    All,
}

/// Checks whether an output is already materialized on durable storage.
#[async_trait]
pub trait OutputProbe: Send + Sync + std::fmt::Debug {
    async fn exists(&self, output_path: &str) -> bool;
}

/// Produced code and map of a bundle.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    pub code: Arc<Vec<u8>>,
    pub map: Option<Arc<Value>>,
}

/// Arguments of bundle creation.
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub packet: PacketIdx,
    /// Explicit entries; `None` derives them from the packet's entries.
    pub entries: Option<Vec<String>>,
    pub format: Option<Format>,
    /// Prepend the client loader; defaults to the entry being a root entry.
    pub loader: Option<bool>,
    /// `false` restricts the bundle to its entry module.
    pub package: bool,
    /// Cross packet boundaries regardless of preloads.
    pub all: bool,
}

impl BundleSpec {
    pub fn new(packet: PacketIdx, entries: Option<Vec<String>>) -> Self {
        Self {
            packet,
            entries,
            format: None,
            loader: None,
            package: true,
            all: false,
        }
    }
}

#[derive(Debug, Default)]
struct BundleState {
    entries: Option<Vec<String>>,
    has_parent: bool,
    children: Vec<Arc<Bundle>>,
    code: Option<Arc<Vec<u8>>>,
    map: Option<Arc<Value>>,
    cache_key: Option<String>,
    contenthash: Option<String>,
}

#[derive(Debug)]
pub struct Bundle {
    pub packet: PacketIdx,
    pub format: Format,
    pub scope: Scope,
    pub loader: bool,
    /// `name/version` of a dependency packet, `None` for the root.
    prefix: Option<String>,
    packet_main: String,
    state: Mutex<BundleState>,
    pub(crate) flights: SingleFlight<String, BundleOutput>,
    pub(crate) reloading: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// The entry name: the first explicit entry when there is exactly one or
/// the packet is the root, the packet main otherwise.
fn entry_name<'a>(entries: Option<&'a [String]>, is_root: bool, main: &'a str) -> &'a str {
    match entries {
        Some(entries) if entries.len() == 1 || is_root => {
            entries.first().map(String::as_str).unwrap_or(main)
        }
        _ => main,
    }
}

impl Bundle {
    /// Look up the bundle for `spec` in its packet, creating it on first use.
    pub(crate) fn create(graph: &mut Graph, spec: BundleSpec, has_preload: bool) -> Arc<Bundle> {
        let format = spec
            .format
            .or_else(|| {
                spec.entries
                    .as_ref()
                    .and_then(|entries| entries.first())
                    .and_then(|entry| Format::from_file(entry))
            })
            .unwrap_or(Format::Js);

        let packet = graph.packet(spec.packet);
        let entry = entry_name(spec.entries.as_deref(), packet.is_root(), &packet.main);
        let outkey = match format {
            Format::Css => replace_ext(entry, ".css"),
            _ => entry.to_string(),
        };
        if let Some(bundle) = packet.bundles.get(&outkey) {
            return bundle.clone();
        }

        let scope = if !spec.package {
            Scope::Module
        } else if has_preload || spec.all || format == Format::Css {
            Scope::All
        } else {
            Scope::Packet
        };

        let entry_module = spec
            .entries
            .as_ref()
            .and_then(|entries| entries.first())
            .and_then(|entry| packet.files.get(entry))
            .copied();
        let loader = match spec.loader {
            Some(loader) => loader,
            None => entry_module.is_some_and(|idx| graph.is_root_entry(idx)),
        };

        let bundle = Arc::new(Bundle {
            packet: spec.packet,
            format,
            scope,
            loader,
            prefix: packet
                .prefix()
                .map(|(name, version)| format!("{name}/{version}")),
            packet_main: packet.main.clone(),
            state: Mutex::new(BundleState {
                entries: spec.entries.filter(|entries| !entries.is_empty()),
                ..BundleState::default()
            }),
            flights: SingleFlight::default(),
            reloading: Mutex::new(None),
        });

        graph
            .packet_mut(spec.packet)
            .bundles
            .insert(outkey, bundle.clone());
        bundle
    }

    fn is_root_packet(&self) -> bool {
        self.prefix.is_none()
    }

    pub fn explicit_entries(&self) -> Option<Vec<String>> {
        self.state.lock().entries.clone()
    }

    /// Explicit entries, or the packet entries of this format that are not
    /// root entries.
    pub fn entries(&self, graph: &Graph) -> Vec<String> {
        if let Some(entries) = self.explicit_entries() {
            return entries;
        }
        graph
            .packet(self.packet)
            .entries
            .iter()
            .filter(|(file, idx)| self.format.includes(file) && !graph.is_root_entry(**idx))
            .map(|(file, _)| file.clone())
            .collect()
    }

    pub(crate) fn add_entry(&self, file: &str) {
        let mut state = self.state.lock();
        let entries = state.entries.get_or_insert_with(Vec::new);
        if entries.iter().any(|entry| entry == file) {
            return;
        }
        if file.ends_with(".css") {
            entries.push(file.to_string());
        } else {
            entries.insert(0, file.to_string());
        }
    }

    pub fn entry(&self) -> String {
        let state = self.state.lock();
        entry_name(state.entries.as_deref(), self.is_root_packet(), &self.packet_main).to_string()
    }

    pub fn outkey(&self) -> String {
        let entry = self.entry();
        match self.format {
            Format::Css => replace_ext(&entry, ".css"),
            _ => entry,
        }
    }

    fn with_prefix(&self, path: String) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path,
        }
    }

    /// `outkey` under the packet prefix; the manifest key.
    pub fn outkey_path(&self) -> String {
        self.with_prefix(self.outkey())
    }

    pub fn entry_path(&self) -> String {
        self.with_prefix(self.entry())
    }

    /// First eight hex digits of the code's BLAKE3 hash; empty without code.
    pub fn contenthash(&self) -> String {
        let mut state = self.state.lock();
        if let Some(hash) = &state.contenthash {
            return hash.clone();
        }
        let Some(code) = &state.code else {
            return String::new();
        };
        let hash = blake3::hash(code).to_hex()[..8].to_string();
        state.contenthash = Some(hash.clone());
        hash
    }

    /// Hashed output name; empty until code has been produced.
    pub fn output(&self) -> String {
        if !self.has_code() {
            return String::new();
        }
        let hash = self.contenthash();
        replace_ext(&self.entry(), &format!(".{hash}{}", self.format.ext()))
    }

    pub fn output_path(&self) -> String {
        let output = self.output();
        if output.is_empty() {
            return output;
        }
        self.with_prefix(output)
    }

    pub fn has_code(&self) -> bool {
        self.state.lock().code.is_some()
    }

    pub fn code(&self) -> Option<Arc<Vec<u8>>> {
        self.state.lock().code.clone()
    }

    pub fn map(&self) -> Option<Arc<Value>> {
        self.state.lock().map.clone()
    }

    pub fn has_parent(&self) -> bool {
        self.state.lock().has_parent
    }

    pub(crate) fn set_parent(&self) {
        self.state.lock().has_parent = true;
    }

    pub fn children(&self) -> Vec<Arc<Bundle>> {
        self.state.lock().children.clone()
    }

    pub(crate) fn add_child(&self, child: &Arc<Bundle>) {
        let mut state = self.state.lock();
        if !state.children.iter().any(|c| Arc::ptr_eq(c, child)) {
            state.children.push(child.clone());
        }
    }

    /// Current output if it was produced for `cache_key`.
    pub(crate) fn cached(&self, cache_key: &str) -> Option<BundleOutput> {
        let state = self.state.lock();
        match (&state.cache_key, &state.code) {
            (Some(key), Some(code)) if key == cache_key => Some(BundleOutput {
                code: code.clone(),
                map: state.map.clone(),
            }),
            _ => None,
        }
    }

    pub(crate) fn store(&self, output: &BundleOutput, cache_key: String) {
        let mut state = self.state.lock();
        state.code = Some(output.code.clone());
        state.map = output.map.clone();
        state.cache_key = Some(cache_key);
        state.contenthash = None;
    }

    /// Drop the produced code and everything derived from it.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.code = None;
        state.map = None;
        state.cache_key = None;
        state.contenthash = None;
    }

    /// Whether the cached code was produced from different entries than the
    /// current ones.
    pub fn revalidate(&self, graph: &Graph) -> bool {
        let cache_key = self.state.lock().cache_key.clone();
        let Some(cache_key) = cache_key else {
            return true;
        };
        let cached: Value = serde_json::from_str(&cache_key).unwrap_or(Value::Null);
        let entries = self.entries(graph);
        cached["entries"] != Value::from(entries)
    }

    pub(crate) fn is_obtained(&self) -> bool {
        self.state.lock().cache_key.is_some()
    }

    fn is_member(&self, graph: &Graph, idx: ModuleIdx) -> bool {
        let kind = &graph.module(idx).kind;
        match self.format {
            Format::Js => {
                matches!(kind, ModuleKind::Script | ModuleKind::Json) || kind.is_scoped_stylesheet()
            }
            Format::Css => kind.is_stylesheet(),
            Format::Wasm => matches!(kind, ModuleKind::Wasm),
        }
    }

    /// Modules of this bundle in definition order: dependencies before
    /// dependents, each module once.
    pub fn members(&self, graph: &Graph) -> Result<Vec<ModuleIdx>> {
        let packet = graph.packet(self.packet);
        let mut entries = self.entries(graph);
        if self.format != Format::Css {
            entries.sort();
        }

        let mut done = FxHashSet::default();
        let mut members = Vec::new();

        for name in &entries {
            let Some(&entry) = packet.files.get(name) else {
                return Err(PorterError::UnparsedEntry {
                    entry: name.clone(),
                    dir: packet.dir.clone(),
                });
            };
            if self.scope == Scope::Module {
                return Ok(vec![entry]);
            }
            let module = graph.module(entry);
            let preload = (module.is_preload || module.fake || module.is_worker()).then_some(entry);
            self.visit(graph, entry, preload, &mut done, &mut members);
        }

        Ok(members)
    }

    /// Post-order walk from `entry` honoring the exclusion rules. `preload`
    /// is the entry when it may pull in preloaded and isolated modules.
    fn visit(
        &self,
        graph: &Graph,
        entry: ModuleIdx,
        preload: Option<ModuleIdx>,
        done: &mut FxHashSet<ModuleIdx>,
        members: &mut Vec<ModuleIdx>,
    ) {
        if !done.insert(entry) {
            return;
        }
        let mut stack = vec![(entry, 0usize)];

        while let Some(top) = stack.len().checked_sub(1) {
            let (idx, pos) = stack[top];
            match graph.module(idx).children.get(pos) {
                Some(&child) => {
                    stack[top].1 += 1;
                    if !done.contains(&child) && self.includes_child(graph, child, preload.is_some()) {
                        done.insert(child);
                        stack.push((child, 0));
                    }
                }
                None => {
                    stack.pop();
                    if self.is_member(graph, idx) && !self.left_to_isolated(graph, idx, preload) {
                        members.push(idx);
                    }
                }
            }
        }
    }

    fn includes_child(&self, graph: &Graph, child: ModuleIdx, preload: bool) -> bool {
        let module = graph.module(child);

        if self.format == Format::Js {
            let foreign = module.packet != self.packet;
            if foreign && self.scope != Scope::All {
                return false;
            }
            if module.preloaded && !preload {
                return false;
            }
            if foreign && graph.packet(module.packet).isolated && !preload {
                return false;
            }
        }

        !(module.kind.is_isolated() || (self.format == Format::Js && graph.is_root_entry(child)))
    }

    /// Modules of an isolated packet reached from a preload of another
    /// packet are walked through but ship in their own bundle.
    fn left_to_isolated(&self, graph: &Graph, idx: ModuleIdx, preload: Option<ModuleIdx>) -> bool {
        let Some(preload) = preload else {
            return false;
        };
        let packet = graph.module(idx).packet;
        graph.packet(packet).isolated && packet != graph.module(preload).packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_name_prefers_single_explicit_entry() {
        let many = vec!["a.js".to_string(), "b.js".to_string()];
        let one = vec!["a.js".to_string()];
        assert_eq!(entry_name(Some(&one), false, "index.js"), "a.js");
        assert_eq!(entry_name(Some(&many), false, "index.js"), "index.js");
        assert_eq!(entry_name(Some(&many), true, "index.js"), "a.js");
        assert_eq!(entry_name(None, true, "index.js"), "index.js");
    }
}
