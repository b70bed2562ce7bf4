//! The top-level coordinator.
//!
//! [`Porter`] owns one isolated graph: its packets, modules, bundles and
//! cache. Phases are split by concern:
//!
//! - `parse`: packet creation and recursive module resolution
//! - `obtain`: per-module transpilation and bundle assembly
//! - `pack`: bundle creation, wrapping and compilation to disk
//! - `read`: the read-file boundary consumed by servers
//! - `reload`: invalidation after source edits

mod obtain;
mod pack;
mod parse;
mod read;
mod reload;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::bundle::{Bundle, BundleOutput, BundleSpec, OutputProbe};
use crate::cache::{Cache, CacheIdentity, CacheRecord};
use crate::error::{PorterError, Result};
use crate::graph::{Graph, PacketIdx};
use crate::module::{Env, ModuleIdx};
use crate::options::PorterOptions;
use crate::runtime::Runtime;
use crate::runtime::native::NativeRuntime;
use crate::single_flight::SingleFlight;
use crate::transpile::{Transpiler, Transpilers};
use crate::watch::Watchers;

pub use read::{FileResponse, ReadQuery};

/// A synthetic root entry with explicit dependencies and source.
#[derive(Debug, Clone)]
pub struct FakeEntry {
    pub entry: String,
    pub deps: Vec<String>,
    pub code: String,
}

#[derive(Debug, Clone)]
pub enum EntrySource {
    File(String),
    Fake(FakeEntry),
}

impl From<&str> for EntrySource {
    fn from(entry: &str) -> Self {
        EntrySource::File(entry.to_string())
    }
}

impl From<FakeEntry> for EntrySource {
    fn from(entry: FakeEntry) -> Self {
        EntrySource::Fake(entry)
    }
}

/// How [`Porter::compile_entry`] bundles its entry.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Write code and map under the output directory.
    pub write: bool,
    /// `false` bundles the entry module alone.
    pub package: bool,
    pub loader: Option<bool>,
    /// Cross packet boundaries.
    pub all: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            write: true,
            package: true,
            loader: None,
            all: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub code: Arc<Vec<u8>>,
    pub map: Option<Arc<Value>>,
    pub output_path: String,
}

/// Entry lists normalized to resolved file names.
#[derive(Debug, Default, Clone)]
struct EntryLists {
    preload: Vec<String>,
    entries: Vec<String>,
    lazyload: Vec<String>,
}

pub(crate) struct Engine {
    pub(crate) options: PorterOptions,
    pub(crate) runtime: Arc<dyn Runtime>,
    pub(crate) transpilers: Transpilers,
    probe: Option<Arc<dyn OutputProbe>>,
    pub(crate) cache: Arc<Cache>,
    env: Env,
    pub(crate) graph: Mutex<Graph>,
    setup: OnceCell<()>,
    ready: [OnceCell<()>; 2],
    lists: Mutex<EntryLists>,
    lazy_bundles: Mutex<Vec<Arc<Bundle>>>,
    manifest: Mutex<BTreeMap<String, String>>,
    id_flights: SingleFlight<(String, bool), Option<Arc<Bundle>>>,
    module_flights: SingleFlight<(ModuleIdx, bool), Arc<CacheRecord>>,
    pub(crate) watchers: Mutex<Option<Watchers>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.options.root)
            .field("runtime", &self.runtime)
            .field("transpilers", &self.transpilers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Porter`].
///
/// ```rust,no_run
/// use porter::{Porter, PorterOptions};
///
/// # fn build() -> porter::Result<()> {
/// let porter = Porter::builder(PorterOptions::new("/srv/app")?).build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PorterBuilder {
    options: PorterOptions,
    runtime: Option<Arc<dyn Runtime>>,
    transpilers: Transpilers,
    probe: Option<Arc<dyn OutputProbe>>,
}

impl PorterBuilder {
    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Script compiler for the root packet and `transpile.include`.
    pub fn script_transpiler(mut self, transpiler: Arc<dyn Transpiler>) -> Self {
        self.transpilers.script = Some(transpiler);
        self
    }

    /// Preprocessor for stylesheets with extension `ext` (e.g. `.less`).
    pub fn style_transpiler(mut self, ext: impl Into<String>, transpiler: Arc<dyn Transpiler>) -> Self {
        self.transpilers.styles.insert(ext.into(), transpiler);
        self
    }

    pub fn output_probe(mut self, probe: Arc<dyn OutputProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Porter {
        let runtime = self
            .runtime
            .unwrap_or_else(|| Arc::new(NativeRuntime::new()));
        let cache = Arc::new(Cache::new(runtime.clone(), self.options.cache_path.clone()));
        let env = Env::new(&self.options.node_env);

        Porter {
            inner: Arc::new(Engine {
                options: self.options,
                runtime,
                transpilers: self.transpilers,
                probe: self.probe,
                cache,
                env,
                graph: Mutex::new(Graph::default()),
                setup: OnceCell::new(),
                ready: [OnceCell::new(), OnceCell::new()],
                lists: Mutex::new(EntryLists::default()),
                lazy_bundles: Mutex::new(Vec::new()),
                manifest: Mutex::new(BTreeMap::new()),
                id_flights: SingleFlight::default(),
                module_flights: SingleFlight::default(),
                watchers: Mutex::new(None),
            }),
        }
    }
}

/// A bundler instance bound to one project root.
///
/// Cloning is cheap; clones share the same graph.
#[derive(Debug, Clone)]
pub struct Porter {
    pub(crate) inner: Arc<Engine>,
}

impl Porter {
    pub fn builder(options: PorterOptions) -> PorterBuilder {
        PorterBuilder {
            options,
            runtime: None,
            transpilers: Transpilers::default(),
            probe: None,
        }
    }

    /// An instance on the native filesystem without transpilers.
    pub fn new(options: PorterOptions) -> Self {
        Self::builder(options).build()
    }

    pub fn options(&self) -> &PorterOptions {
        &self.inner.options
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// Run `f` against the current graph.
    ///
    /// The graph is locked for the duration of the call; do not call back
    /// into the engine from `f`.
    pub fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.inner.graph.lock())
    }

    /// Bundle registered on the root packet under `outkey`.
    pub fn bundle(&self, outkey: &str) -> Option<Arc<Bundle>> {
        self.with_graph(|graph| {
            graph
                .has_root()
                .then(|| graph.root().bundles.get(outkey).cloned())
                .flatten()
        })
    }

    /// Aggregate lock of the whole tree.
    pub fn lock(&self) -> Value {
        self.with_graph(|graph| graph.lock(PacketIdx::ROOT))
    }

    /// Prepare the graph once per `minify` flag.
    pub async fn ready(&self, minify: bool) -> Result<()> {
        self.inner.ready(minify).await
    }

    /// Create and obtain the bundles of every packet.
    pub async fn pack(&self, minify: bool) -> Result<()> {
        self.inner.pack(minify).await
    }

    /// Compile every reachable bundle to the output directory and return
    /// the manifest.
    pub async fn compile_all(&self, entries: &[String]) -> Result<BTreeMap<String, String>> {
        self.inner.compile_all(entries).await
    }

    pub async fn compile_entry(
        &self,
        entry: impl Into<EntrySource>,
        options: CompileOptions,
    ) -> Result<CompileOutput> {
        self.inner.compile_entry(entry.into(), options).await
    }

    /// Serve one logical path: loader, bundles, maps, assets and sources.
    pub async fn read_file(&self, path: &str, query: ReadQuery) -> Result<Option<FileResponse>> {
        self.inner.read_file(path, query).await
    }

    /// Resolve an output id to its bundle, parsing on demand.
    pub async fn parse_id(&self, id: &str, is_entry: bool) -> Result<Option<Arc<Bundle>>> {
        self.inner.ready(false).await?;
        self.inner.parse_id(id, is_entry).await
    }

    /// Obtain a bundle's code in development or minified form.
    pub async fn obtain(&self, bundle: &Arc<Bundle>, minify: bool) -> Result<BundleOutput> {
        self.inner.obtain_bundle(bundle, minify).await
    }

    /// Refresh root bundles whose dependency bundles went stale.
    pub async fn reload(&self) -> Result<()> {
        self.inner.reload().await
    }

    /// React to an edit of `path`: reload the module and schedule its
    /// bundles for a debounced rebuild.
    pub async fn handle_change(&self, path: &Path) -> Result<()> {
        self.inner.handle_change(path).await
    }
}

impl Engine {
    fn has_preload(&self) -> bool {
        !self.options.preload.is_empty()
    }

    async fn ready(&self, minify: bool) -> Result<()> {
        self.setup.get_or_try_init(|| self.prepare()).await?;
        self.ready[usize::from(minify)]
            .get_or_try_init(|| async {
                if !minify {
                    self.pack(false).await?;
                    let bundles: Vec<_> = {
                        let graph = self.graph.lock();
                        graph.root().bundles.values().cloned().collect()
                    };
                    for bundle in bundles {
                        let empty = bundle.entries(&self.graph.lock()).is_empty();
                        if !empty {
                            self.obtain_bundle(&bundle, false).await?;
                        }
                    }
                }
                Ok::<_, PorterError>(())
            })
            .await?;
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        let identity = CacheIdentity {
            transpiler: self
                .transpilers
                .script
                .as_ref()
                .map(|t| (t.name().to_string(), t.version().to_string(), t.options())),
            minify: serde_json::to_value(&self.options.minify)?,
        };
        self.cache
            .prepare(Cache::identifier(&identity), self.options.cache_clean)
            .await?;
        self.create_root().await?;

        debug!("parse preload, entries and lazyload");
        let options = &self.options;
        let (preload, entries, lazyload) = futures::try_join!(
            try_join_all(options.preload.iter().map(|f| self.parse_listed(f, false))),
            try_join_all(options.entries.iter().map(|f| self.parse_listed(f, true))),
            try_join_all(options.lazyload.iter().map(|f| self.parse_listed(f, false))),
        )?;
        let lists = EntryLists {
            preload: preload.into_iter().flatten().collect(),
            entries: entries.into_iter().flatten().collect(),
            lazyload: lazyload.into_iter().flatten().collect(),
        };

        {
            let mut graph = self.graph.lock();
            for file in &lists.preload {
                let Some(&entry) = graph.root().files.get(file) else {
                    continue;
                };
                graph.module_mut(entry).is_preload = true;
                for member in graph.family(entry) {
                    let isolated = graph.packet(graph.module(member).packet).isolated;
                    graph.module_mut(member).preloaded = !isolated;
                }
            }
        }

        let lazy_bundles = {
            let mut graph = self.graph.lock();
            let mut done = Default::default();
            let mut family = Vec::new();
            for file in &lists.lazyload {
                if let Some(&entry) = graph.root().files.get(file) {
                    graph.family_with(entry, false, &mut done, &mut family);
                }
            }

            let has_preload = self.has_preload();
            let mut bundles = Vec::new();
            for member in family {
                let (packet, file) = {
                    let module = graph.module(member);
                    (module.packet, module.file.clone())
                };
                if packet == PacketIdx::ROOT {
                    let spec = BundleSpec {
                        loader: Some(false),
                        package: false,
                        ..BundleSpec::new(packet, Some(vec![file]))
                    };
                    bundles.push(Bundle::create(&mut graph, spec, has_preload));
                } else {
                    graph.packet_mut(packet).lazyloaded = true;
                }
            }
            bundles
        };
        for bundle in &lazy_bundles {
            self.obtain_bundle(bundle, false).await?;
        }

        *self.lazy_bundles.lock() = lazy_bundles;
        *self.lists.lock() = lists;
        Ok(())
    }

    /// Parse one configured file, returning its resolved name.
    async fn parse_listed(&self, file: &str, is_entry: bool) -> Result<Option<String>> {
        let found = if is_entry {
            self.parse_entry(PacketIdx::ROOT, file).await?
        } else {
            self.parse_file(PacketIdx::ROOT, file).await?.module()
        };
        match found {
            Some(idx) => Ok(Some(self.graph.lock().module(idx).file.clone())),
            None => {
                warn!("entry {file} not found in {}", self.options.root.display());
                Ok(None)
            }
        }
    }
}
