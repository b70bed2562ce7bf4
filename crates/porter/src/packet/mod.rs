//! One resolved package: the root project or an installed dependency.

pub mod manifest;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use porter_config::Remap;
use serde_json::Value;

use crate::bundle::Bundle;
use crate::graph::PacketIdx;
use crate::module::ModuleIdx;

pub use manifest::{PackageMeta, resolve_export};

/// Outcome of resolving a specifier inside a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Module(ModuleIdx),
    /// Explicitly disabled through a `browser` map, a fallback or `.d.ts`.
    Disabled,
    Missing,
}

impl Resolved {
    pub fn module(self) -> Option<ModuleIdx> {
        match self {
            Resolved::Module(idx) => Some(idx),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Packet {
    pub name: String,
    pub version: String,
    /// Real path of the package directory.
    pub dir: PathBuf,
    /// Directories searched for files, in order.
    pub paths: Vec<PathBuf>,
    pub parent: Option<PacketIdx>,
    pub dependencies: BTreeMap<String, PacketIdx>,
    pub entries: IndexMap<String, ModuleIdx>,
    pub files: IndexMap<String, ModuleIdx>,
    pub bundles: IndexMap<String, Arc<Bundle>>,
    pub browser: BTreeMap<String, Remap>,
    pub exports: Option<Value>,
    /// Specifiers that resolved to a directory index.
    pub folder: BTreeMap<String, bool>,
    /// Prefix aliases, applied before normalization.
    pub alias: BTreeMap<String, String>,
    pub main: String,
    /// `node_modules` directories of this packet and its ancestors.
    pub dep_paths: Vec<PathBuf>,
    /// Bundled separately instead of into dependents.
    pub isolated: bool,
    pub lazyloaded: bool,
    /// Runs the registered script transpiler over its scripts.
    pub transpile: bool,
    /// Lock of the deployment a fake root packet mirrors.
    pub fake_lock: Option<Value>,
}

impl Packet {
    pub fn new(meta: PackageMeta, dir: PathBuf, paths: Vec<PathBuf>, parent: Option<PacketIdx>) -> Self {
        let PackageMeta {
            name,
            version,
            main,
            browser,
            exports,
        } = meta;
        Self {
            name,
            version,
            dir,
            paths,
            parent,
            dependencies: BTreeMap::new(),
            entries: IndexMap::new(),
            files: IndexMap::new(),
            bundles: IndexMap::new(),
            browser,
            exports,
            folder: BTreeMap::new(),
            alias: BTreeMap::new(),
            main,
            dep_paths: Vec::new(),
            isolated: false,
            lazyloaded: false,
            transpile: false,
            fake_lock: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_fake(&self) -> bool {
        self.fake_lock.is_some()
    }

    /// `name/version/` for dependencies, nothing for the root.
    pub fn prefix(&self) -> Option<(&str, &str)> {
        self.parent
            .map(|_| (self.name.as_str(), self.version.as_str()))
    }

    /// Apply the first matching alias prefix.
    pub fn apply_alias(&self, file: &str) -> String {
        for (key, target) in &self.alias {
            if let Some(rest) = file.strip_prefix(key.as_str()) {
                return format!("{target}{rest}");
            }
        }
        file.to_string()
    }

    /// Map `file` through the `browser` and `exports` fields.
    ///
    /// Returns `None` when the file is explicitly disabled. A trailing `/`
    /// asks for the directory index; leading `./` and `/` are dropped.
    pub fn normalize_file(&self, file: &str) -> Option<String> {
        let remap = self
            .browser
            .get(&format!("./{file}"))
            .or_else(|| self.browser.get(&format!("./{file}.js")));

        let mut file = match remap {
            Some(Remap::Flag(false)) => return None,
            Some(Remap::Path(target)) => target.clone(),
            _ => self
                .exports
                .as_ref()
                .and_then(|exports| resolve_export(exports, file))
                .unwrap_or_else(|| file.to_string()),
        };

        if file.ends_with('/') {
            file.push_str("index");
        }
        let mut rest = file.as_str();
        loop {
            if let Some(stripped) = rest.strip_prefix("./") {
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix('/') {
                rest = stripped;
            } else {
                break;
            }
        }
        Some(rest.to_string())
    }

    /// Whether a normalized file climbs above the packet directory.
    pub fn escapes(file: &str) -> bool {
        file == ".." || file.starts_with("../")
    }

    /// Remapping of a specifier by the `browser` field, as `browser[dep]`
    /// or `browser[dep + ".js"]`.
    pub fn browser_remap(&self, dep: &str) -> Option<&Remap> {
        self.browser
            .get(dep)
            .or_else(|| self.browser.get(&format!("{dep}.js")))
    }

    /// Whether the main entry is the default `index.js`.
    pub fn main_is_index(&self) -> bool {
        matches!(
            self.main.trim_start_matches("./"),
            "index" | "index.js"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn packet(meta: Value) -> Packet {
        let meta = PackageMeta::from_value(Path::new("/pkg"), &meta).unwrap();
        Packet::new(meta, PathBuf::from("/pkg"), vec![PathBuf::from("/pkg")], None)
    }

    #[test]
    fn browser_field_overrides_and_disables() {
        let packet = packet(json!({
            "name": "demo",
            "browser": { "./lib/node.js": "./lib/browser.js", "./fs.js": false }
        }));
        assert_eq!(packet.normalize_file("lib/node").as_deref(), Some("lib/browser.js"));
        assert_eq!(packet.normalize_file("fs.js"), None);
        assert_eq!(packet.normalize_file("fs"), None);
        assert_eq!(packet.normalize_file("lib/").as_deref(), Some("lib/index"));
        assert_eq!(packet.normalize_file("./a").as_deref(), Some("a"));
    }

    #[test]
    fn keeps_dotfiles_and_parent_segments() {
        let packet = packet(json!({ "name": "demo" }));
        assert_eq!(packet.normalize_file(".eslintrc.js").as_deref(), Some(".eslintrc.js"));
        assert_eq!(packet.normalize_file("/./lib/a").as_deref(), Some("lib/a"));
        assert_eq!(packet.normalize_file("../outside").as_deref(), Some("../outside"));
        assert!(Packet::escapes("../outside"));
        assert!(!Packet::escapes("..hidden.js"));
    }

    #[test]
    fn exports_apply_when_browser_is_silent() {
        let packet = packet(json!({
            "name": "demo",
            "exports": { ".": "./dist/index.js", "./feature": { "require": "./dist/feature.cjs" } }
        }));
        assert_eq!(packet.normalize_file("").as_deref(), Some("dist/index.js"));
        assert_eq!(packet.normalize_file("feature").as_deref(), Some("dist/feature.cjs"));
        assert_eq!(packet.normalize_file("other").as_deref(), Some("other"));
    }

    #[test]
    fn aliases_replace_prefixes() {
        let mut packet = packet(json!({ "name": "demo" }));
        packet.alias.insert("@/".into(), "src/".into());
        assert_eq!(packet.apply_alias("@/home"), "src/home");
        assert_eq!(packet.apply_alias("./home"), "./home");
    }
}
