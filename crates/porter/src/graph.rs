//! The arena holding every packet and module of one engine.
//!
//! Packets and modules refer to each other by index. The engine keeps the
//! graph behind a mutex and never holds it across an await point, so every
//! method here is synchronous.

use std::path::PathBuf;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value, json};

use crate::constants::Format;
use crate::module::{Module, ModuleIdx};
use crate::options::PorterOptions;
use crate::packet::Packet;

/// Handle of a packet in the engine's arena. The root is always index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketIdx(pub(crate) usize);

impl PacketIdx {
    pub const ROOT: PacketIdx = PacketIdx(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    packets: Vec<Packet>,
    modules: Vec<Module>,
    /// Absolute file path to module, one module per file.
    pub(crate) module_cache: FxHashMap<PathBuf, ModuleIdx>,
    /// Real directory to packet, one packet per directory.
    pub(crate) packet_cache: FxHashMap<PathBuf, PacketIdx>,
}

impl Graph {
    pub fn has_root(&self) -> bool {
        !self.packets.is_empty()
    }

    pub fn packet(&self, idx: PacketIdx) -> &Packet {
        &self.packets[idx.0]
    }

    pub fn packet_mut(&mut self, idx: PacketIdx) -> &mut Packet {
        &mut self.packets[idx.0]
    }

    pub fn root(&self) -> &Packet {
        self.packet(PacketIdx::ROOT)
    }

    pub fn module(&self, idx: ModuleIdx) -> &Module {
        &self.modules[idx.0]
    }

    pub fn module_mut(&mut self, idx: ModuleIdx) -> &mut Module {
        &mut self.modules[idx.0]
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleIdx, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, module)| (ModuleIdx(i), module))
    }

    pub(crate) fn insert_packet(&mut self, packet: Packet) -> PacketIdx {
        let idx = PacketIdx(self.packets.len());
        self.packet_cache.insert(packet.dir.clone(), idx);
        self.packets.push(packet);
        idx
    }

    /// Register a dependency packet unless one with the same directory, or
    /// the same name and version, is already in the arena. Packets created
    /// concurrently may not be attached to the tree yet, so the whole arena
    /// is searched.
    pub(crate) fn share_packet(&mut self, packet: Packet) -> PacketIdx {
        if let Some(&idx) = self.packet_cache.get(&packet.dir) {
            return idx;
        }
        let existing = self
            .packets
            .iter()
            .position(|p| p.name == packet.name && p.version == packet.version);
        match existing {
            Some(pos) => {
                let idx = PacketIdx(pos);
                self.packet_cache.insert(packet.dir, idx);
                idx
            }
            None => self.insert_packet(packet),
        }
    }

    /// Register a module, or return the one already owning its path.
    pub(crate) fn insert_module(&mut self, module: Module) -> ModuleIdx {
        if let Some(&idx) = self.module_cache.get(&module.fpath) {
            return idx;
        }
        let idx = ModuleIdx(self.modules.len());
        self.module_cache.insert(module.fpath.clone(), idx);
        self.modules.push(module);
        idx
    }

    /// Register a module that replaces whatever owned its path before.
    pub(crate) fn replace_module(&mut self, module: Module) -> ModuleIdx {
        self.module_cache.remove(&module.fpath);
        self.insert_module(module)
    }

    /// `packet` followed by its transitive dependencies, each once.
    pub fn all(&self, packet: PacketIdx) -> Vec<PacketIdx> {
        let mut done = FxHashSet::default();
        let mut result = Vec::new();
        let mut stack = vec![packet];

        while let Some(idx) = stack.pop() {
            if !done.insert(idx) {
                continue;
            }
            result.push(idx);
            let deps: Vec<_> = self.packet(idx).dependencies.values().copied().collect();
            stack.extend(deps.into_iter().rev());
        }
        result
    }

    /// First packet in the tree below `from` with `name` (and `version`).
    pub fn find(&self, from: PacketIdx, name: &str, version: Option<&str>) -> Option<PacketIdx> {
        self.all(from).into_iter().find(|&idx| {
            let packet = self.packet(idx);
            packet.name == name && version.is_none_or(|v| packet.version == v)
        })
    }

    pub fn find_all(&self, from: PacketIdx, name: &str) -> Vec<PacketIdx> {
        self.all(from)
            .into_iter()
            .filter(|&idx| self.packet(idx).name == name)
            .collect()
    }

    /// Entries of the root packet, and worker entries anywhere.
    pub fn is_root_entry(&self, idx: ModuleIdx) -> bool {
        let module = self.module(idx);
        let packet = self.packet(module.packet);
        packet.entries.contains_key(&module.file) && (packet.is_root() || module.is_worker())
    }

    /// Post-order closure of `root` over static children, each module once.
    pub fn family(&self, root: ModuleIdx) -> Vec<ModuleIdx> {
        let mut out = Vec::new();
        self.family_with(root, false, &mut FxHashSet::default(), &mut out);
        out
    }

    /// Like [`Graph::family`], sharing `done` across calls. With
    /// `dynamic` the walk also follows dynamic imports.
    pub fn family_with(
        &self,
        root: ModuleIdx,
        dynamic: bool,
        done: &mut FxHashSet<ModuleIdx>,
        out: &mut Vec<ModuleIdx>,
    ) {
        if !done.insert(root) {
            return;
        }
        let edges = |idx: ModuleIdx| {
            let module = self.module(idx);
            let dynamic_children: &[ModuleIdx] = if dynamic { &module.dynamic_children } else { &[] };
            module.children.iter().chain(dynamic_children).copied()
        };

        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.len().checked_sub(1) {
            let (idx, pos) = stack[top];
            match edges(idx).nth(pos) {
                Some(child) => {
                    stack[top].1 += 1;
                    if done.insert(child) {
                        stack.push((child, 0));
                    }
                }
                None => {
                    stack.pop();
                    out.push(idx);
                }
            }
        }
    }

    /// Whether the packet should be bundled and was not bundled yet.
    pub fn bundleable(&self, idx: PacketIdx, has_preload: bool) -> bool {
        let packet = self.packet(idx);
        (!has_preload || packet.isolated) && packet.bundles.is_empty()
    }

    /// The serializable description of one packet inside a lock.
    pub fn copy(&self, idx: PacketIdx) -> Value {
        let packet = self.packet(idx);
        let mut copy = Map::new();
        let mut manifest = Map::new();

        for (file, bundle) in &packet.bundles {
            if packet.is_root() {
                if let Some(&entry) = packet.entries.get(file) {
                    if !self.module(entry).is_preload {
                        continue;
                    }
                }
                // stylesheets extracted from root entries ride along with them
                if !bundle.has_parent() && bundle.format == Format::Css && bundle.scope != crate::bundle::Scope::Module {
                    continue;
                }
            }
            if packet.isolated || !bundle.has_parent() {
                let output = bundle.output();
                if !output.is_empty() {
                    manifest.insert(file.clone(), Value::from(output));
                }
            }
        }

        if !manifest.is_empty() {
            copy.insert("manifest".into(), Value::Object(manifest));
        }
        if !packet.main_is_index() {
            copy.insert("main".into(), Value::from(packet.main.as_str()));
        }
        if !packet.folder.is_empty() {
            copy.insert("folder".into(), json!(packet.folder));
        }
        if !packet.browser.is_empty() {
            copy.insert("browser".into(), json!(packet.browser));
        }
        if !packet.dependencies.is_empty() {
            let dependencies: Map<String, Value> = packet
                .dependencies
                .iter()
                .map(|(name, &dep)| (name.clone(), Value::from(self.packet(dep).version.as_str())))
                .collect();
            copy.insert("dependencies".into(), Value::Object(dependencies));
        }

        Value::Object(copy)
    }

    /// `{name: {version: copy}}` over every packet below `idx`, layered on
    /// the supplied lock of a fake root.
    pub fn lock(&self, idx: PacketIdx) -> Value {
        let mut lock = self
            .packet(idx)
            .fake_lock
            .clone()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));

        for dep in self.all(idx) {
            merge_copy(&mut lock, self.packet(dep), self.copy(dep));
        }
        lock
    }

    /// Lock restricted to the packets reachable from one module, with the
    /// root's dependencies trimmed to those packets.
    pub fn module_lock(&self, idx: ModuleIdx) -> Value {
        let mut lock = json!({});
        let mut seen = FxHashSet::default();
        let mut family = Vec::new();
        self.family_with(idx, true, &mut FxHashSet::default(), &mut family);

        for member in family {
            let packet_idx = self.module(member).packet;
            if seen.insert(packet_idx) {
                merge_copy(&mut lock, self.packet(packet_idx), self.copy(packet_idx));
            }
        }

        let owner = self.packet(self.module(idx).packet);
        let names: FxHashSet<String> = lock
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(deps) = lock
            .get_mut(&owner.name)
            .and_then(|copies| copies.get_mut(&owner.version))
            .and_then(|copy| copy.get_mut("dependencies"))
            .and_then(Value::as_object_mut)
        {
            deps.retain(|name, _| names.contains(name));
        }
        lock
    }

    /// Configuration inlined into the client loader.
    pub fn loader_config(&self, idx: PacketIdx, options: &PorterOptions) -> Value {
        let packet = self.packet(idx);
        let preload = if packet.is_root() {
            options.preload.clone()
        } else {
            Vec::new()
        };
        let package = match (&options.package, packet.is_fake()) {
            (Some(package), true) => package.clone(),
            _ => json!({
                "name": packet.name,
                "version": packet.version,
                "main": packet.main,
            }),
        };

        json!({
            "alias": packet.alias,
            "baseUrl": options.base_url,
            "map": options.map,
            "preload": preload,
            "package": package,
            "timeout": options.timeout,
        })
    }
}

fn merge_copy(lock: &mut Value, packet: &Packet, copy: Value) {
    let Some(lock) = lock.as_object_mut() else {
        return;
    };
    let copies = lock
        .entry(packet.name.clone())
        .or_insert_with(|| json!({}));
    let Some(copies) = copies.as_object_mut() else {
        return;
    };
    let existing = copies
        .entry(packet.version.clone())
        .or_insert_with(|| json!({}));
    if let (Some(existing), Value::Object(copy)) = (existing.as_object_mut(), copy) {
        existing.extend(copy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PackageMeta;

    fn packet(name: &str, parent: Option<PacketIdx>) -> Packet {
        let meta = PackageMeta::from_value(
            std::path::Path::new("/"),
            &json!({ "name": name, "version": "1.0.0" }),
        )
        .unwrap();
        let dir = PathBuf::from(format!("/{name}"));
        Packet::new(meta, dir.clone(), vec![dir], parent)
    }

    fn module(graph: &mut Graph, packet: PacketIdx, file: &str) -> ModuleIdx {
        let fpath = graph.packet(packet).dir.join(file);
        graph.insert_module(Module::new(file.to_string(), file.to_string(), fpath, packet))
    }

    #[test]
    fn family_is_post_order_and_cycle_safe() {
        let mut graph = Graph::default();
        let root = graph.insert_packet(packet("app", None));
        let a = module(&mut graph, root, "a.js");
        let b = module(&mut graph, root, "b.js");
        let c = module(&mut graph, root, "c.js");
        graph.module_mut(a).children = vec![b, c];
        graph.module_mut(b).children = vec![a, c];

        assert_eq!(graph.family(a), vec![c, b, a]);
        assert_eq!(graph.family(b), vec![c, a, b]);
    }

    #[test]
    fn modules_are_unique_per_path() {
        let mut graph = Graph::default();
        let root = graph.insert_packet(packet("app", None));
        let a = module(&mut graph, root, "a.js");
        assert_eq!(module(&mut graph, root, "a.js"), a);
    }

    #[test]
    fn packets_are_shared_per_name_and_version() {
        let mut graph = Graph::default();
        let root = graph.insert_packet(packet("app", None));
        let first = graph.share_packet(packet("c", Some(root)));

        let mut copy = packet("c", Some(root));
        copy.dir = PathBuf::from("/b/node_modules/c");
        assert_eq!(graph.share_packet(copy), first);
        assert_eq!(
            graph.packet_cache.get(&PathBuf::from("/b/node_modules/c")),
            Some(&first)
        );
        assert_eq!(graph.packets.len(), 2);
    }

    #[test]
    fn lock_lists_dependency_versions() {
        let mut graph = Graph::default();
        let root = graph.insert_packet(packet("app", None));
        let dep = graph.insert_packet(packet("react", Some(root)));
        graph.packet_mut(root).dependencies.insert("react".into(), dep);
        graph.packet_mut(dep).main = "cjs/react.js".into();

        let lock = graph.lock(root);
        assert_eq!(lock["app"]["1.0.0"]["dependencies"]["react"], "1.0.0");
        assert_eq!(lock["react"]["1.0.0"]["main"], "cjs/react.js");
        assert!(lock["app"]["1.0.0"].get("main").is_none());

        assert_eq!(graph.find(root, "react", Some("1.0.0")), Some(dep));
        assert_eq!(graph.find(root, "react", Some("2.0.0")), None);
        assert_eq!(graph.all(root), vec![root, dep]);
    }
}
