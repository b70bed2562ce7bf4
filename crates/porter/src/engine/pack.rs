//! Packing packets into bundles and compiling bundles to disk.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{CompileOptions, CompileOutput, Engine, EntrySource};
use crate::bundle::sourcemap::set_source_map;
use crate::bundle::{Bundle, BundleSpec};
use crate::constants::{Format, extname, replace_ext};
use crate::error::{PorterError, Result};
use crate::graph::PacketIdx;
use crate::module::ModuleStatus;

const LOADING_POLL: Duration = Duration::from_millis(10);

impl Engine {
    /// Parses started elsewhere return early, so wait for every file of the
    /// packet to settle before enumerating bundles.
    async fn settle(&self, packet: PacketIdx) {
        loop {
            let loading = {
                let graph = self.graph.lock();
                graph
                    .packet(packet)
                    .files
                    .values()
                    .any(|&idx| graph.module(idx).status == ModuleStatus::Loading)
            };
            if !loading {
                return;
            }
            tokio::time::sleep(LOADING_POLL).await;
        }
    }

    /// Create the bundles of one packet and obtain (or minify) them.
    pub(super) async fn pack_packet(&self, packet: PacketIdx, minify: bool) -> Result<()> {
        self.settle(packet).await;
        let has_preload = self.has_preload();

        let bundles: Vec<Arc<Bundle>> = {
            let mut graph = self.graph.lock();
            let (entries, main) = {
                let p = graph.packet(packet);
                let mut entries: Vec<String> = Vec::new();
                for &idx in p.files.values() {
                    let file = &graph.module(idx).file;
                    if entries.contains(file) {
                        continue;
                    }
                    if graph.is_root_entry(idx) {
                        entries.push(file.clone());
                    } else if extname(file) == ".wasm" {
                        entries.insert(0, file.clone());
                    }
                }
                let main = (!has_preload || p.isolated || p.lazyloaded).then(|| p.main.clone());
                (entries, main)
            };

            for entry in entries {
                if main.as_ref() == Some(&entry) {
                    continue;
                }
                Bundle::create(&mut graph, BundleSpec::new(packet, Some(vec![entry])), has_preload);
            }
            if main.is_some() {
                Bundle::create(&mut graph, BundleSpec::new(packet, None), has_preload);
            }
            graph.packet(packet).bundles.values().cloned().collect()
        };

        for bundle in bundles {
            if bundle.entries(&self.graph.lock()).is_empty() {
                continue;
            }
            if minify && self.exists(&bundle).await? {
                continue;
            }
            self.obtain_bundle(&bundle, minify).await?;
        }
        Ok(())
    }

    /// Pack dependency packets that no bundle covers yet.
    pub(super) async fn pack_dependencies(&self, minify: bool) -> Result<()> {
        let has_preload = self.has_preload();
        let packets: Vec<PacketIdx> = {
            let graph = self.graph.lock();
            graph
                .all(PacketIdx::ROOT)
                .into_iter()
                .filter(|&idx| idx != PacketIdx::ROOT && graph.bundleable(idx, has_preload))
                .collect()
        };
        for packet in packets {
            self.pack_packet(packet, minify).await?;
        }
        Ok(())
    }

    pub(super) async fn pack(&self, minify: bool) -> Result<()> {
        let packets: Vec<PacketIdx> = self
            .graph
            .lock()
            .all(PacketIdx::ROOT)
            .into_iter()
            .filter(|&idx| idx != PacketIdx::ROOT)
            .collect();
        for packet in packets {
            self.pack_packet(packet, minify).await?;
        }

        let roots: Vec<String> = {
            let lists = self.lists.lock();
            lists.preload.iter().chain(&lists.entries).cloned().collect()
        };
        let all = self.has_preload();
        for file in roots {
            self.wrap(BundleSpec {
                all,
                ..BundleSpec::new(PacketIdx::ROOT, Some(vec![file]))
            });
        }
        Ok(())
    }

    /// Create the bundle for `spec` along with the bundles it splits off:
    /// the extracted stylesheet, worker bundles and one bundle per dynamic
    /// import. Returns every bundle touched, `spec`'s own first.
    pub(super) fn wrap(&self, spec: BundleSpec) -> Vec<Arc<Bundle>> {
        let has_preload = self.has_preload();
        let mut graph = self.graph.lock();
        let mut results: Vec<Arc<Bundle>> = Vec::new();
        let mut queue = VecDeque::from([(spec, None::<Arc<Bundle>>)]);

        while let Some((spec, parent)) = queue.pop_front() {
            let entries = spec.entries.clone().unwrap_or_default();
            let bundle = Bundle::create(&mut graph, spec.clone(), has_preload);
            if let Some(parent) = &parent {
                bundle.set_parent();
                parent.add_child(&bundle);
            }
            if results.iter().any(|b| Arc::ptr_eq(b, &bundle)) {
                continue;
            }
            results.push(bundle.clone());

            let Some(first) = entries.first() else {
                continue;
            };
            let Some(&entry) = graph.packet(spec.packet).files.get(first) else {
                continue;
            };
            let entry_file = graph.module(entry).file.clone();

            if bundle.format == Format::Css {
                let packet = graph.packet(spec.packet);
                let sibling = packet.entries.keys().find(|file| {
                    **file != entry_file && replace_ext(file, ".css") == entry_file
                });
                if let Some(sibling) = sibling {
                    bundle.add_entry(sibling);
                }
                for file in &entries {
                    bundle.add_entry(file);
                }
                continue;
            }
            if bundle.format != Format::Js {
                continue;
            }

            // only root packets split off worker bundles
            let split_workers = spec.packet == PacketIdx::ROOT;
            let mut styled = false;
            for member in graph.family(entry) {
                let module = graph.module(member);
                styled |= module.kind.is_stylesheet();
                for &child in &module.dynamic_children {
                    let child = graph.module(child);
                    let spec = BundleSpec {
                        loader: Some(false),
                        ..BundleSpec::new(child.packet, Some(vec![child.file.clone()]))
                    };
                    queue.push_back((spec, Some(bundle.clone())));
                }
                for &worker in module.workers.iter().filter(|_| split_workers) {
                    let worker = graph.module(worker);
                    let spec = BundleSpec::new(worker.packet, Some(vec![worker.file.clone()]));
                    queue.push_back((spec, Some(bundle.clone())));
                }
            }

            if styled {
                let css = Bundle::create(
                    &mut graph,
                    BundleSpec {
                        format: Some(Format::Css),
                        ..spec.clone()
                    },
                    has_preload,
                );
                for file in &entries {
                    css.add_entry(file);
                }
                if !results.iter().any(|b| Arc::ptr_eq(b, &css)) {
                    results.push(css);
                }
            }
        }
        results
    }

    /// Whether the minified output of `bundle` is already on durable
    /// storage. Always false without a probe.
    async fn exists(&self, bundle: &Arc<Bundle>) -> Result<bool> {
        let Some(probe) = &self.probe else {
            return Ok(false);
        };
        self.obtain_bundle(bundle, true).await?;
        Ok(probe.exists(&bundle.output_path()).await)
    }

    fn record_manifest(&self, bundle: &Bundle) {
        let output_path = bundle.output_path();
        if !output_path.is_empty() {
            self.manifest.lock().insert(bundle.outkey_path(), output_path);
        }
    }

    /// Minify `bundle` and its children and write code and map under the
    /// output directory.
    fn compile_bundle<'a>(&'a self, bundle: &'a Arc<Bundle>) -> BoxFuture<'a, Result<()>> {
        async move {
            if self.exists(bundle).await? {
                self.record_manifest(bundle);
                return Ok(());
            }
            for child in bundle.children() {
                self.compile_bundle(&child).await?;
            }

            if bundle.entries(&self.graph.lock()).is_empty() {
                return Err(PorterError::BundleEmpty {
                    entry_path: bundle.entry_path(),
                });
            }
            let output = self.obtain_bundle(bundle, true).await?;
            let output_path = bundle.output_path();
            if output_path.is_empty() {
                return Err(PorterError::BundleEmpty {
                    entry_path: bundle.entry_path(),
                });
            }

            let fpath = self.options.output.join(&output_path);
            if bundle.format == Format::Wasm {
                self.runtime.write_file(&fpath, &output.code).await?;
            } else {
                let map = output.map.as_deref().cloned().unwrap_or_else(|| json!({}));
                let (code, map) = set_source_map(
                    &output.code,
                    &map,
                    bundle.format,
                    &output_path,
                    &self.options.source,
                );
                let map_path = self.options.output.join(format!("{output_path}.map"));
                self.runtime.write_file(&fpath, &code).await?;
                self.runtime
                    .write_file(&map_path, &serde_json::to_vec(&map)?)
                    .await?;
            }

            self.record_manifest(bundle);
            debug!("compiled {}", output_path);
            Ok(())
        }
        .boxed()
    }

    async fn compile_packet(&self, packet: PacketIdx) -> Result<()> {
        let bundles: Vec<Arc<Bundle>> = {
            let graph = self.graph.lock();
            graph
                .packet(packet)
                .bundles
                .values()
                .filter(|bundle| !bundle.entries(&graph).is_empty())
                .cloned()
                .collect()
        };
        for bundle in bundles {
            self.compile_bundle(&bundle).await?;
        }
        Ok(())
    }

    /// Dependency packets compiled on their own: the excluded ones when
    /// there are preloads (the rest ride along with the preload bundle),
    /// every dependency otherwise.
    fn compiled_packets(&self) -> Result<Vec<PacketIdx>> {
        let graph = self.graph.lock();
        if !self.has_preload() {
            return Ok(graph
                .all(PacketIdx::ROOT)
                .into_iter()
                .filter(|&idx| idx != PacketIdx::ROOT)
                .collect());
        }

        let mut packets = Vec::new();
        for name in &self.options.exclude {
            let found = graph.find_all(PacketIdx::ROOT, name);
            if found.is_empty() {
                return Err(PorterError::UnknownDependency(name.clone()));
            }
            packets.extend(found);
        }
        Ok(packets)
    }

    pub(super) async fn compile_all(&self, extra: &[String]) -> Result<BTreeMap<String, String>> {
        if self.options.output_clean {
            if let Err(e) = self.runtime.remove_dir(&self.options.output).await {
                if !e.is_not_found() {
                    return Err(e.into());
                }
            }
        }

        debug!("prepare");
        self.ready(true).await?;
        let mut entries = self.lists.lock().entries.clone();
        for entry in extra {
            match self.parse_entry(PacketIdx::ROOT, entry).await? {
                Some(idx) => {
                    let file = self.graph.lock().module(idx).file.clone();
                    if !entries.contains(&file) {
                        entries.push(file);
                    }
                }
                None => warn!("entry {entry} not found in {}", self.options.root.display()),
            }
        }

        debug!("minify");
        self.pack(true).await?;

        debug!("compile packets");
        for packet in self.compiled_packets()? {
            self.compile_packet(packet).await?;
        }

        debug!("compile lazyload");
        let lazy_bundles = self.lazy_bundles.lock().clone();
        for bundle in &lazy_bundles {
            self.compile_bundle(bundle).await?;
        }

        debug!("compile preload and entries");
        let preload = self.lists.lock().preload.clone();
        let all = self.has_preload();
        for file in preload.into_iter().chain(entries) {
            let bundles = self.wrap(BundleSpec {
                all,
                ..BundleSpec::new(PacketIdx::ROOT, Some(vec![file]))
            });
            for bundle in &bundles {
                self.compile_bundle(bundle).await?;
            }
        }

        let manifest = self.manifest.lock().clone();
        let manifest_path = self.options.root.join("manifest.json");
        self.runtime
            .write_file(&manifest_path, serde_json::to_string_pretty(&manifest)?.as_bytes())
            .await?;
        info!(
            "compiled {} bundles to {}",
            manifest.len(),
            self.options.output.display()
        );
        Ok(manifest)
    }

    pub(super) async fn compile_entry(
        &self,
        source: EntrySource,
        options: CompileOptions,
    ) -> Result<CompileOutput> {
        self.ready(true).await?;

        let file = match source {
            EntrySource::File(entry) => {
                let Some(idx) = self.parse_entry(PacketIdx::ROOT, &entry).await? else {
                    return Err(PorterError::UnparsedEntry {
                        entry,
                        dir: self.options.root.clone(),
                    });
                };
                self.graph.lock().module(idx).file.clone()
            }
            EntrySource::Fake(fake) => {
                // fake entries always start from scratch
                self.graph
                    .lock()
                    .packet_mut(PacketIdx::ROOT)
                    .bundles
                    .shift_remove(&fake.entry);
                self.parse_fake_entry(&fake).await?;
                fake.entry
            }
        };

        let spec = BundleSpec {
            loader: options.loader,
            package: options.package,
            all: options.all,
            ..BundleSpec::new(PacketIdx::ROOT, Some(vec![file.clone()]))
        };
        let bundles = self.wrap(spec);
        let Some(main) = bundles.first().cloned() else {
            return Err(PorterError::BundleEmpty { entry_path: file });
        };
        if options.write {
            for bundle in &bundles {
                self.compile_bundle(bundle).await?;
            }
        }

        let output = self.obtain_bundle(&main, true).await?;
        Ok(CompileOutput {
            code: output.code,
            map: output.map,
            output_path: main.output_path(),
        })
    }
}
