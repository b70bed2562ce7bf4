//! Packet creation and recursive module resolution.

use std::path::{Path, PathBuf};

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use path_clean::PathClean;
use porter_config::Remap;
use tracing::{debug, warn};

use super::{Engine, FakeEntry};
use crate::constants::URL_LIKE;
use crate::error::{PorterError, Result};
use crate::graph::{Graph, PacketIdx};
use crate::module::{
    ImportScan, Loaders, Module, ModuleIdx, ModuleKind, ModuleStatus, WORKER_LOADER, module_id,
    parse_loaders, scan_script, scan_style,
};
use crate::packet::{PackageMeta, Packet, Resolved};

/// A logical name matched on disk.
#[derive(Debug)]
pub(super) struct Resolution {
    /// Logical name with the matched suffix appended.
    pub file: String,
    pub fpath: PathBuf,
    pub suffix: String,
}

/// Split `@scope/name/file` into the package name and the file within.
fn split_specifier(specifier: &str) -> (&str, &str) {
    let mut slashes = specifier.match_indices('/').map(|(pos, _)| pos);
    let end = if specifier.starts_with('@') {
        slashes.nth(1)
    } else {
        slashes.next()
    };
    match end {
        Some(pos) => (&specifier[..pos], &specifier[pos + 1..]),
        None => (specifier, ""),
    }
}

/// `dep` resolved against the directory of `file`, with `/` separators.
fn join_relative(file: &str, dep: &str) -> String {
    let dir = Path::new(file).parent().unwrap_or_else(|| Path::new(""));
    let joined = dir.join(dep).clean();
    let mut joined = joined.to_string_lossy().replace('\\', "/");
    if dep.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}

/// Attach a resolved import to `parent`. Worker imports become entries of
/// their own packet instead of child edges.
pub(super) fn attach(graph: &mut Graph, parent: ModuleIdx, child: ModuleIdx, loaders: Loaders, dynamic: bool) {
    let is_worker = loaders.contains_key(WORKER_LOADER);
    if !loaders.is_empty() {
        graph.module_mut(child).loaders.extend(loaders);
    }

    if is_worker {
        let (packet, file) = {
            let module = graph.module(child);
            (module.packet, module.file.clone())
        };
        graph.packet_mut(packet).entries.insert(file, child);
        graph.module_mut(parent).add_worker(child);
    } else if dynamic {
        graph.module_mut(parent).add_dynamic_child(child);
    } else {
        graph.module_mut(parent).add_child(child);
    }
}

impl Engine {
    /// Existing `node_modules` directories of `dir` and its ancestors.
    fn dep_paths(&self, dir: &Path) -> Vec<PathBuf> {
        dir.ancestors()
            .map(|ancestor| ancestor.join("node_modules"))
            .filter(|candidate| self.runtime.exists(candidate))
            .collect()
    }

    /// Resolve `packet.main` to the file it names on disk.
    async fn prepare_main(&self, packet: &mut Packet) {
        let Some(main) = packet.normalize_file(&packet.main) else {
            return;
        };
        if let Some(found) = self.resolve(&packet.paths, &main).await {
            packet.main = found.file;
        }
    }

    pub(super) async fn create_root(&self) -> Result<PacketIdx> {
        if self.graph.lock().has_root() {
            return Ok(PacketIdx::ROOT);
        }

        let options = &self.options;
        let meta = match &options.package {
            Some(package) if options.is_fake() => PackageMeta::from_value(&options.root, package)?,
            _ => {
                let content = self
                    .runtime
                    .read_to_string(&options.root.join("package.json"))
                    .await?;
                PackageMeta::parse(&options.root, &content)?
            }
        };

        let dir = self
            .runtime
            .canonicalize(&options.root)
            .await
            .unwrap_or_else(|_| options.root.clone());
        let mut packet = Packet::new(meta, dir.clone(), options.paths.clone(), None);
        packet.alias = options.alias.clone();
        packet.transpile = self.transpilers.script.is_some();
        if options.is_fake() {
            packet.fake_lock = options.lock.clone();
        }
        packet.dep_paths = self.dep_paths(&dir);
        self.prepare_main(&mut packet).await;

        debug!("root packet {}@{} ({})", packet.name, packet.version, dir.display());
        Ok(self.graph.lock().insert_packet(packet))
    }

    /// Packet in `dir`, shared by every dependent that resolves to the same
    /// real directory or to the same name and version.
    async fn create_packet(&self, dir: &Path, parent: PacketIdx) -> Result<PacketIdx> {
        let dir = self.runtime.canonicalize(dir).await?;
        let cached = self.graph.lock().packet_cache.get(&dir).copied();
        if let Some(idx) = cached {
            return Ok(idx);
        }

        let content = self.runtime.read_to_string(&dir.join("package.json")).await?;
        let meta = PackageMeta::parse(&dir, &content)?;

        let existing = {
            let graph = self.graph.lock();
            graph.find(PacketIdx::ROOT, &meta.name, Some(&meta.version))
        };
        if let Some(idx) = existing {
            self.graph.lock().packet_cache.insert(dir, idx);
            return Ok(idx);
        }

        let mut packet = Packet::new(meta, dir.clone(), vec![dir.clone()], Some(parent));
        packet.isolated = self.options.exclude.contains(&packet.name);
        packet.transpile =
            self.transpilers.script.is_some() && self.options.transpile_include.contains(&packet.name);
        packet.dep_paths = self.dep_paths(&dir);
        self.prepare_main(&mut packet).await;

        // another dependent may have created it while main was resolved
        let mut graph = self.graph.lock();
        let (name, version) = (packet.name.clone(), packet.version.clone());
        let idx = graph.share_packet(packet);
        debug!("packet {name}@{version} ({})", dir.display());
        Ok(idx)
    }

    /// First existing `{path}/{file}{suffix}` over search paths, then
    /// suffixes.
    pub(super) async fn resolve(&self, paths: &[PathBuf], file: &str) -> Option<Resolution> {
        for dir in paths {
            for suffix in &self.options.suffixes {
                let candidate = format!("{file}{suffix}");
                let fpath = dir.join(&candidate);
                if self.runtime.is_file(&fpath).await {
                    return Some(Resolution {
                        file: candidate,
                        fpath,
                        suffix: suffix.clone(),
                    });
                }
            }
        }
        None
    }

    /// Find or create the module for `file` without parsing it.
    pub(super) async fn parse_module(&self, packet: PacketIdx, file: &str) -> Result<Resolved> {
        let (normalized, paths) = {
            let graph = self.graph.lock();
            let owner = graph.packet(packet);
            let Some(normalized) = owner.normalize_file(&owner.apply_alias(file)) else {
                return Ok(Resolved::Disabled);
            };
            if Packet::escapes(&normalized) {
                return Ok(Resolved::Missing);
            }
            if let Some(&idx) = owner.files.get(&normalized) {
                return Ok(Resolved::Module(idx));
            }
            (normalized, owner.paths.clone())
        };

        let Some(found) = self.resolve(&paths, &normalized).await else {
            return Ok(Resolved::Missing);
        };
        if found.file.ends_with(".d.ts") {
            return Ok(Resolved::Disabled);
        }

        let mut graph = self.graph.lock();
        if found.suffix.starts_with("/index") {
            graph.packet_mut(packet).folder.insert(normalized.clone(), true);
        }
        let idx = match graph.module_cache.get(&found.fpath) {
            Some(&idx) => idx,
            None => {
                let owner = graph.packet(packet);
                let id = module_id(&found.file, owner.prefix());
                graph.insert_module(Module::new(id, found.file.clone(), found.fpath, packet))
            }
        };

        let owner = graph.packet_mut(packet);
        owner.files.entry(found.file).or_insert(idx);
        owner.files.insert(normalized, idx);
        Ok(Resolved::Module(idx))
    }

    pub(super) async fn parse_file(&self, packet: PacketIdx, file: &str) -> Result<Resolved> {
        let resolved = self.parse_module(packet, file).await?;
        if let Resolved::Module(idx) = resolved {
            self.parse(idx).await?;
        }
        Ok(resolved)
    }

    /// Parse `entry` and register it under the packet's entries. An empty
    /// entry names the packet main.
    pub(super) async fn parse_entry(&self, packet: PacketIdx, entry: &str) -> Result<Option<ModuleIdx>> {
        let entry = if entry.is_empty() {
            self.graph.lock().packet(packet).main.clone()
        } else {
            entry.to_string()
        };

        let Resolved::Module(idx) = self.parse_module(packet, &entry).await? else {
            return Ok(None);
        };
        {
            let mut graph = self.graph.lock();
            let file = graph.module(idx).file.clone();
            graph.packet_mut(packet).entries.insert(file, idx);
        }
        self.parse(idx).await?;
        Ok(Some(idx))
    }

    /// Register a synthetic root entry, replacing any earlier module with
    /// the same name.
    pub(super) async fn parse_fake_entry(&self, fake: &FakeEntry) -> Result<ModuleIdx> {
        let idx = {
            let mut graph = self.graph.lock();
            let root = graph.root();
            let base = root.paths.first().unwrap_or(&root.dir);
            let mut module = Module::new(
                module_id(&fake.entry, None),
                fake.entry.clone(),
                base.join(&fake.entry),
                PacketIdx::ROOT,
            );
            module.fake = true;
            module.kind = ModuleKind::Script;
            module.imports = fake.deps.clone();
            module.fake_code = Some(fake.code.clone());

            let idx = graph.replace_module(module);
            let root = graph.packet_mut(PacketIdx::ROOT);
            root.files.insert(fake.entry.clone(), idx);
            root.entries.insert(fake.entry.clone(), idx);
            idx
        };
        self.parse(idx).await?;
        Ok(idx)
    }

    /// Source of a module as scanned and transpiled: the synthetic code of
    /// fake modules, environment-inlined scripts, raw text otherwise.
    pub(super) async fn load_source(&self, module: &Module) -> Result<String> {
        let source = match &module.fake_code {
            Some(code) => code.clone(),
            None => self.runtime.read_to_string(&module.fpath).await?,
        };
        Ok(match module.kind {
            ModuleKind::Script => self.env.apply(&source),
            _ => source,
        })
    }

    pub(super) fn scan(&self, module: &Module, source: &str) -> Result<ImportScan> {
        if module.fake {
            return Ok(ImportScan {
                imports: module.imports.clone(),
                ..ImportScan::default()
            });
        }
        Ok(match &module.kind {
            ModuleKind::Script => scan_script(source, &module.fpath)?,
            ModuleKind::Stylesheet {
                preprocessor: None, ..
            } => scan_style(source),
            _ => ImportScan::default(),
        })
    }

    /// Load, scan and resolve a module and, recursively, its imports.
    ///
    /// Calls on a module that is already loading or loaded return at once,
    /// which is what keeps import cycles finite.
    pub(super) fn parse(&self, idx: ModuleIdx) -> BoxFuture<'_, Result<()>> {
        async move {
            {
                let mut graph = self.graph.lock();
                let module = graph.module_mut(idx);
                if module.status != ModuleStatus::Init {
                    return Ok(());
                }
                module.status = ModuleStatus::Loading;
            }

            let result = self.parse_imports(idx).await;
            let mut graph = self.graph.lock();
            graph.module_mut(idx).status = match result {
                Ok(()) => ModuleStatus::Loaded,
                Err(_) => ModuleStatus::Init,
            };
            result
        }
        .boxed()
    }

    async fn parse_imports(&self, idx: ModuleIdx) -> Result<()> {
        let module = self.graph.lock().module(idx).clone();
        if matches!(module.kind, ModuleKind::Json | ModuleKind::Wasm | ModuleKind::Stub) {
            return Ok(());
        }

        let source = self.load_source(&module).await?;
        let mut scan = self.scan(&module, &source)?;

        if !module.fake {
            if let Some(record) = self.cache.get(&module.id, source.as_bytes()).await {
                for import in &record.imports {
                    if !scan.imports.contains(import) {
                        scan.imports.push(import.clone());
                    }
                }
                for import in &record.dynamic_imports {
                    if !scan.dynamic_imports.contains(import) {
                        scan.dynamic_imports.push(import.clone());
                    }
                }
                self.graph.lock().module_mut(idx).cache = Some(std::sync::Arc::new(record));
            }
        }

        {
            let mut graph = self.graph.lock();
            let module = graph.module_mut(idx);
            module.imports = scan.imports.clone();
            module.dynamic_imports = scan.dynamic_imports.clone();
            module.esm = scan.esm;
        }

        self.resolve_imports(idx, &scan.imports, &scan.dynamic_imports)
            .await
    }

    /// Resolve specifiers of `idx` and attach the modules found.
    pub(super) async fn resolve_imports(
        &self,
        idx: ModuleIdx,
        imports: &[String],
        dynamic_imports: &[String],
    ) -> Result<()> {
        let (statics, dynamics) = futures::try_join!(
            try_join_all(imports.iter().map(|spec| self.parse_import(idx, spec))),
            try_join_all(dynamic_imports.iter().map(|spec| self.parse_import(idx, spec))),
        )?;

        let mut graph = self.graph.lock();
        for (child, loaders) in statics.into_iter().flatten() {
            attach(&mut graph, idx, child, loaders, false);
        }
        for (child, loaders) in dynamics.into_iter().flatten() {
            attach(&mut graph, idx, child, loaders, true);
        }
        Ok(())
    }

    /// Resolve one specifier of `parent`. `None` covers remote URLs,
    /// disabled specifiers and unmet dependencies.
    pub(super) async fn parse_import(
        &self,
        parent: ModuleIdx,
        specifier: &str,
    ) -> Result<Option<(ModuleIdx, Loaders)>> {
        if URL_LIKE.is_match(specifier) {
            return Ok(None);
        }
        let (dep, loaders) = parse_loaders(specifier);

        let (packet, file, fpath, fake, dep, aliased) = {
            let graph = self.graph.lock();
            let module = graph.module(parent);
            let owner = graph.packet(module.packet);
            let dep = match owner.browser_remap(&dep) {
                Some(Remap::Flag(false)) => return Ok(None),
                Some(Remap::Path(target)) => target.clone(),
                _ => dep,
            };
            let aliased = owner.alias.keys().any(|prefix| dep.starts_with(prefix.as_str()));
            (
                module.packet,
                module.file.clone(),
                module.fpath.clone(),
                module.fake,
                dep,
                aliased,
            )
        };

        let resolved = if dep.starts_with('.') {
            let target = join_relative(&file, &dep);
            match self.parse_file(packet, &target).await? {
                Resolved::Missing if !fake => {
                    return Err(PorterError::UnresolvedRelative {
                        specifier: specifier.to_string(),
                        from: fpath,
                    });
                }
                resolved => resolved,
            }
        } else if aliased {
            self.parse_file(packet, &dep).await?
        } else {
            self.parse_dependency(packet, &dep, &fpath).await?
        };

        Ok(resolved.module().map(|idx| (idx, loaders)))
    }

    /// Resolve a bare specifier through dependencies, the root packet and
    /// the configured fallbacks, in that order.
    async fn parse_dependency(&self, packet: PacketIdx, dep: &str, from: &Path) -> Result<Resolved> {
        let mut dep = dep.to_string();

        for redirected in [false, true] {
            let (name, entry) = split_specifier(&dep);
            if let Some(child) = self.parse_packet(packet, name).await? {
                match self.parse_dependency_entry(child, entry).await? {
                    Resolved::Missing => break,
                    resolved => return Ok(resolved),
                }
            }

            let root_name = self.graph.lock().root().name.clone();
            let file = if name == root_name { entry } else { dep.as_str() };
            if let resolved @ (Resolved::Module(_) | Resolved::Disabled) =
                self.parse_file_in(PacketIdx::ROOT, file).await?
            {
                return Ok(resolved);
            }

            if redirected {
                break;
            }
            match self.options.fallback.get(name) {
                Some(Remap::Flag(false)) => return Ok(Resolved::Disabled),
                Some(Remap::Path(target)) => {
                    let mut graph = self.graph.lock();
                    graph
                        .packet_mut(packet)
                        .browser
                        .insert(dep.clone(), Remap::Path(target.clone()));
                    dep = target.clone();
                }
                _ => break,
            }
        }

        if !self.graph.lock().root().is_fake() {
            warn!("unmet dependency {dep} ({})", from.display());
        }
        Ok(Resolved::Missing)
    }

    /// Parse `entry` of a dependency and register it among the packet's
    /// entries, which its bundles are built from.
    async fn parse_dependency_entry(&self, packet: PacketIdx, entry: &str) -> Result<Resolved> {
        let entry = if entry.is_empty() {
            self.graph.lock().packet(packet).main.clone()
        } else {
            entry.to_string()
        };
        let resolved = self.parse_module(packet, &entry).await?;
        if let Resolved::Module(idx) = resolved {
            {
                let mut graph = self.graph.lock();
                let file = graph.module(idx).file.clone();
                graph.packet_mut(packet).entries.insert(file, idx);
            }
            self.parse(idx).await?;
        }
        Ok(resolved)
    }

    /// Parse `file` in `packet`, or its main when `file` is empty.
    async fn parse_file_in(&self, packet: PacketIdx, file: &str) -> Result<Resolved> {
        if file.is_empty() {
            let main = self.graph.lock().packet(packet).main.clone();
            return self.parse_file(packet, &main).await;
        }
        self.parse_file(packet, file).await
    }

    /// The dependency `name` as seen from `from`, created on first use.
    async fn parse_packet(&self, from: PacketIdx, name: &str) -> Result<Option<PacketIdx>> {
        let dep_paths = {
            let graph = self.graph.lock();
            let packet = graph.packet(from);
            if let Some(&idx) = packet.dependencies.get(name) {
                return Ok(Some(idx));
            }
            packet.dep_paths.clone()
        };

        for dir in dep_paths {
            let candidate = dir.join(name);
            if !self.runtime.exists(&candidate.join("package.json")) {
                continue;
            }
            let idx = self.create_packet(&candidate, from).await?;
            self.graph
                .lock()
                .packet_mut(from)
                .dependencies
                .insert(name.to_string(), idx);
            return Ok(Some(idx));
        }
        Ok(None)
    }
}
