//! Incremental invalidation after source edits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use rustc_hash::FxHashSet;
use tracing::debug;

use super::Engine;
use super::parse::attach;
use crate::bundle::Bundle;
use crate::constants::{Format, replace_ext};
use crate::error::Result;
use crate::graph::PacketIdx;
use crate::module::ModuleIdx;

/// Window in which repeated reloads of one bundle coalesce.
pub(crate) const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

impl Engine {
    /// Drop the produced code of `bundle` and its cached output file.
    async fn clear_bundle(&self, bundle: &Bundle) {
        let output_path = bundle.output_path();
        if !output_path.is_empty() {
            debug!("reloading {} -> {}", bundle.entry_path(), output_path);
            // a missing file is as good as a removed one
            let _ = self
                .runtime
                .remove_file(&self.cache.path().join(&output_path))
                .await;
        }
        bundle.clear();
    }

    /// Clear `bundle` once no further reload request arrives within
    /// [`RELOAD_DEBOUNCE`].
    fn schedule_reload(self: &Arc<Self>, bundle: Arc<Bundle>) {
        let engine = Arc::downgrade(self);
        let target = bundle.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            if let Some(engine) = engine.upgrade() {
                engine.clear_bundle(&target).await;
            }
        });
        if let Some(previous) = bundle.reloading.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Reload root bundles whose dependency bundles of the same format went
    /// stale, then pack again.
    pub(super) async fn reload(&self) -> Result<()> {
        let stale: Vec<Arc<Bundle>> = {
            let graph = self.graph.lock();
            let root = graph.root();
            let mut stale = Vec::new();
            for (file, &entry) in &root.entries {
                let Some(bundle) = root.bundles.get(file) else {
                    continue;
                };
                let mut done = FxHashSet::default();
                'family: for member in graph.family(entry) {
                    let packet = graph.module(member).packet;
                    if packet == PacketIdx::ROOT || !done.insert(packet) {
                        continue;
                    }
                    for dep in graph.packet(packet).bundles.values() {
                        if dep.format == bundle.format && dep.revalidate(&graph) {
                            stale.push(bundle.clone());
                            break 'family;
                        }
                    }
                }
            }
            stale
        };

        for bundle in stale {
            self.clear_bundle(&bundle).await;
        }
        self.pack(false).await
    }

    /// Re-read one module, attach imports that appeared and re-transpile.
    /// Stylesheet children stay attached even when their import is gone.
    async fn reload_module(&self, idx: ModuleIdx) -> Result<()> {
        let module = self.graph.lock().module(idx).clone();
        if module.fake {
            return Ok(());
        }
        debug!("reloading {} ({})", module.file, module.fpath.display());

        let source = self.load_source(&module).await?;
        let scan = self.scan(&module, &source)?;
        let (statics, dynamics) = futures::try_join!(
            try_join_all(scan.imports.iter().map(|spec| self.parse_import(idx, spec))),
            try_join_all(scan.dynamic_imports.iter().map(|spec| self.parse_import(idx, spec))),
        )?;

        let minified = {
            let mut graph = self.graph.lock();
            let styles: Vec<ModuleIdx> = module
                .children
                .iter()
                .copied()
                .filter(|&child| graph.module(child).kind.is_stylesheet())
                .collect();
            {
                let target = graph.module_mut(idx);
                target.children.clear();
                target.dynamic_children.clear();
                target.imports = scan.imports.clone();
                target.dynamic_imports = scan.dynamic_imports.clone();
                target.esm = scan.esm;
            }
            for (child, loaders) in statics.into_iter().flatten() {
                attach(&mut graph, idx, child, loaders, false);
            }
            for (child, loaders) in dynamics.into_iter().flatten() {
                attach(&mut graph, idx, child, loaders, true);
            }
            let target = graph.module_mut(idx);
            for style in styles {
                target.add_child(style);
            }
            target.cache.take().is_some_and(|record| record.minified)
        };

        self.obtain_module(idx, minified).await?;
        Ok(())
    }

    /// Reload `file` of `packet` and schedule every bundle containing it.
    async fn reload_file(self: &Arc<Self>, idx: ModuleIdx) -> Result<()> {
        let fpath = self.graph.lock().module(idx).fpath.clone();
        let Ok(metadata) = self.runtime.metadata(&fpath).await else {
            return Ok(());
        };
        let Some(mtime) = metadata.modified else {
            return Ok(());
        };
        {
            let mut graph = self.graph.lock();
            let module = graph.module_mut(idx);
            if module.reloaded.is_some_and(|reloaded| reloaded >= mtime) {
                return Ok(());
            }
            module.reloaded = Some(mtime);
        }
        self.reload_module(idx).await?;

        let affected: Vec<Arc<Bundle>> = {
            let graph = self.graph.lock();
            let packet = graph.module(idx).packet;
            let mut bundles: Vec<Arc<Bundle>> = graph.packet(packet).bundles.values().cloned().collect();
            if packet != PacketIdx::ROOT {
                bundles.extend(graph.root().bundles.values().cloned());
            }

            let mut outkeys = FxHashSet::default();
            for bundle in &bundles {
                let contains = bundle
                    .members(&graph)
                    .is_ok_and(|members| members.contains(&idx));
                if contains {
                    outkeys.insert((bundle.packet, bundle.outkey()));
                    if bundle.format == Format::Js {
                        outkeys.insert((bundle.packet, replace_ext(&bundle.outkey(), ".css")));
                    }
                }
            }
            bundles
                .into_iter()
                .filter(|bundle| outkeys.contains(&(bundle.packet, bundle.outkey())))
                .collect()
        };

        for bundle in affected {
            self.schedule_reload(bundle);
        }
        Ok(())
    }

    /// Route a filesystem change to the module read from `path`.
    pub(crate) async fn handle_change(self: &Arc<Self>, path: &Path) -> Result<()> {
        let mut idx = self.graph.lock().module_cache.get(path).copied();
        if idx.is_none() {
            if let Ok(real) = self.runtime.canonicalize(path).await {
                idx = self.graph.lock().module_cache.get(&real).copied();
            }
        }
        match idx {
            Some(idx) => self.reload_file(idx).await,
            None => Ok(()),
        }
    }
}
