//! Per-module transpilation and bundle assembly.

use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::Engine;
use crate::bundle::sourcemap::{self, Chunk, source_name};
use crate::bundle::{Bundle, BundleOutput};
use crate::cache::CacheRecord;
use crate::constants::Format;
use crate::error::{PorterError, Result};
use crate::graph::PacketIdx;
use crate::loader;
use crate::module::{Module, ModuleIdx, ModuleKind};
use crate::transpile::{TranspileInput, minify_script, transform_style};

/// `porter.define(id, imports, factory)` around a CommonJS body. The body
/// starts on the first line so its lines keep their numbers.
fn wrap_script(id: &str, imports: &[String], body: &str) -> String {
    format!(
        "porter.define({}, {}, function(require, exports, module) {{{body}\n}})",
        Value::from(id),
        Value::from(imports.to_vec()),
    )
}

impl Engine {
    pub(super) fn source_name(&self, fpath: &Path) -> String {
        source_name(&self.options.relative(fpath))
    }

    /// Transpiled artifact of one module, minified on request.
    ///
    /// Concurrent calls for the same module and flag share one
    /// computation.
    pub(crate) async fn obtain_module(&self, idx: ModuleIdx, minify: bool) -> Result<Arc<CacheRecord>> {
        self.module_flights
            .run((idx, minify), || self.transpile_module(idx, minify))
            .await
    }

    async fn transpile_module(&self, idx: ModuleIdx, minify: bool) -> Result<Arc<CacheRecord>> {
        let module = self.graph.lock().module(idx).clone();
        if let Some(record) = &module.cache {
            if !minify || record.minified {
                return Ok(record.clone());
            }
        }

        let (record, source) = match &module.kind {
            ModuleKind::Stub | ModuleKind::Wasm => return Ok(Arc::new(CacheRecord::default())),
            ModuleKind::Json => self.transpile_json(&module, minify).await?,
            ModuleKind::Script => self.transpile_script(idx, &module, minify).await?,
            ModuleKind::Stylesheet {
                scoped,
                preprocessor,
            } => {
                self.transpile_style(&module, *scoped, preprocessor.as_deref(), minify)
                    .await?
            }
        };

        let record = Arc::new(record);
        self.graph.lock().module_mut(idx).cache = Some(record.clone());

        if !module.fake {
            let cache = self.cache.clone();
            let key = module.id.clone();
            let persisted = record.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.set(&key, source.as_bytes(), &persisted).await {
                    error!("{e}");
                }
            });
        }
        Ok(record)
    }

    async fn transpile_json(&self, module: &Module, minify: bool) -> Result<(CacheRecord, String)> {
        let source = self.load_source(module).await?;
        let value: Value = serde_json::from_str(&source)
            .map_err(|e| PorterError::parse_failure(&module.fpath, e.to_string()))?;
        let json = if minify {
            value.to_string()
        } else {
            serde_json::to_string_pretty(&value)?
        };

        let record = CacheRecord {
            code: format!("porter.define({}, {json})", Value::from(module.id.as_str())),
            minified: minify,
            ..CacheRecord::default()
        };
        Ok((record, source))
    }

    async fn transpile_script(
        &self,
        idx: ModuleIdx,
        module: &Module,
        minify: bool,
    ) -> Result<(CacheRecord, String)> {
        let source = self.load_source(module).await?;
        let source_name = self.source_name(&module.fpath);
        let mut imports = module.imports.clone();
        let mut dynamic_imports = module.dynamic_imports.clone();

        let transpiler = {
            let graph = self.graph.lock();
            graph
                .packet(module.packet)
                .transpile
                .then(|| self.transpilers.script.clone())
                .flatten()
        };

        let mut body = source.clone();
        let mut map = None;
        let mut transpiled = false;
        if let Some(transpiler) = transpiler {
            let output = transpiler
                .transpile(TranspileInput {
                    code: source.clone(),
                    map: None,
                    path: module.fpath.clone(),
                    source_name: source_name.clone(),
                    minify,
                })
                .await?;
            if let Some(output) = output {
                let scan = self.scan(module, &output.code)?;
                let added: Vec<String> = scan
                    .imports
                    .into_iter()
                    .filter(|import| !imports.contains(import))
                    .collect();
                let added_dynamic: Vec<String> = scan
                    .dynamic_imports
                    .into_iter()
                    .filter(|import| !dynamic_imports.contains(import))
                    .collect();
                if !added.is_empty() || !added_dynamic.is_empty() {
                    self.resolve_imports(idx, &added, &added_dynamic).await?;
                    imports.extend(added);
                    dynamic_imports.extend(added_dynamic);
                    let mut graph = self.graph.lock();
                    let target = graph.module_mut(idx);
                    target.imports = imports.clone();
                    target.dynamic_imports = dynamic_imports.clone();
                }
                body = output.code;
                map = output.map;
                transpiled = true;
            }
        }

        let mut code = wrap_script(&module.id, &imports, &body);
        if minify {
            if module.esm && !transpiled {
                warn!(
                    "{} uses ES module syntax and no script transpiler is registered, skipping minification",
                    module.id
                );
            } else {
                let output = minify_script(&code, &module.fpath, Some(&source_name), &self.options.minify)?;
                code = output.code;
                map = output.map;
            }
        }

        let record = CacheRecord {
            code,
            map,
            imports,
            dynamic_imports,
            minified: minify,
            es_module: module.esm,
            ..CacheRecord::default()
        };
        Ok((record, source))
    }

    async fn transpile_style(
        &self,
        module: &Module,
        scoped: bool,
        preprocessor: Option<&str>,
        minify: bool,
    ) -> Result<(CacheRecord, String)> {
        let source = self.load_source(module).await?;
        let source_name = self.source_name(&module.fpath);

        let css = match preprocessor {
            None => Some(source.clone()),
            Some(ext) => match self.transpilers.style(ext) {
                Some(transpiler) => {
                    let output = transpiler
                        .transpile(TranspileInput {
                            code: source.clone(),
                            map: None,
                            path: module.fpath.clone(),
                            source_name: source_name.clone(),
                            minify,
                        })
                        .await?;
                    Some(output.map_or_else(|| source.clone(), |output| output.code))
                }
                None => {
                    warn!("no {ext} preprocessor registered, serving {} as is", module.id);
                    None
                }
            },
        };

        let record = match css {
            Some(css) => {
                let output = transform_style(&css, &module.fpath, &source_name, scoped, minify)?;
                let exports = match output.exports {
                    Some(exports) if scoped => Some(format!(
                        "porter.define({}, {})",
                        Value::from(module.id.as_str()),
                        serde_json::to_string(&exports)?
                    )),
                    _ => None,
                };
                CacheRecord {
                    code: output.code,
                    exports,
                    imports: module.imports.clone(),
                    minified: minify,
                    ..CacheRecord::default()
                }
            }
            None => CacheRecord {
                code: source.clone(),
                imports: module.imports.clone(),
                minified: minify,
                ..CacheRecord::default()
            },
        };
        Ok((record, source))
    }

    /// Assembled code of a bundle, memoized per `{entries, minify}`.
    pub(crate) fn obtain_bundle<'a>(
        &'a self,
        bundle: &'a Arc<Bundle>,
        minify: bool,
    ) -> BoxFuture<'a, Result<BundleOutput>> {
        async move {
            let entries = bundle.entries(&self.graph.lock());
            let cache_key = json!({ "entries": entries, "minify": minify }).to_string();
            if let Some(output) = bundle.cached(&cache_key) {
                return Ok(output);
            }
            bundle
                .flights
                .run(cache_key.clone(), || self.assemble(bundle, minify, cache_key))
                .await
        }
        .boxed()
    }

    async fn assemble(&self, bundle: &Arc<Bundle>, minify: bool, cache_key: String) -> Result<BundleOutput> {
        let (members, entry) = {
            let graph = self.graph.lock();
            let members = bundle.members(&graph)?;
            let entry = graph.packet(bundle.packet).files.get(&bundle.entry()).copied();
            (members, entry)
        };

        if bundle.format == Format::Wasm {
            let Some(&first) = members.first() else {
                return Err(PorterError::BundleEmpty {
                    entry_path: bundle.entry_path(),
                });
            };
            let fpath = self.graph.lock().module(first).fpath.clone();
            let output = BundleOutput {
                code: Arc::new(self.runtime.read_file(&fpath).await?),
                map: None,
            };
            bundle.store(&output, cache_key);
            return Ok(output);
        }

        let (root_entry, is_preload, entry_id) = {
            let graph = self.graph.lock();
            match entry {
                Some(entry) if graph.is_root_entry(entry) => {
                    let module = graph.module(entry);
                    (Some(entry), module.is_preload, module.id.clone())
                }
                _ => (None, false, String::new()),
            }
        };
        let is_js = bundle.format == Format::Js;

        let mut head = Vec::new();
        if let (Some(entry), true) = (root_entry, is_js) {
            if bundle.loader {
                head.push(self.loader_chunk(minify)?);
            }
            if !is_preload {
                self.pack_dependencies(minify).await?;
                for child in bundle.children() {
                    self.obtain_bundle(&child, minify).await?;
                }
                let lock = self.graph.lock().module_lock(entry);
                head.push(Chunk::glue(format!("porter.merge(porter.lock, {lock})")));
            }
        }

        let records = try_join_all(members.iter().map(|&idx| self.obtain_module(idx, minify))).await?;
        let mut chunks = head;
        {
            let graph = self.graph.lock();
            for (&idx, record) in members.iter().zip(&records) {
                let module = graph.module(idx);
                if is_js && module.kind.is_stylesheet() {
                    if let Some(exports) = &record.exports {
                        chunks.push(Chunk::glue(exports.clone()));
                    }
                    continue;
                }
                chunks.push(Chunk::mapped(
                    record.code.clone(),
                    record.map.clone(),
                    self.source_name(&module.fpath),
                ));
            }
        }

        if root_entry.is_some() && is_js && bundle.loader {
            chunks.push(Chunk::glue(format!(
                "porter[\"import\"]({})",
                Value::from(entry_id)
            )));
        }

        let (code, map) = sourcemap::concat(&chunks);
        let output = BundleOutput {
            code: Arc::new(code.into_bytes()),
            map: Some(Arc::new(map)),
        };
        bundle.store(&output, cache_key);
        debug!(
            "bundle complete {} -> {} ({} modules)",
            bundle.entry_path(),
            bundle.output_path(),
            members.len()
        );
        Ok(output)
    }

    fn loader_chunk(&self, minify: bool) -> Result<Chunk> {
        let config = self.graph.lock().loader_config(PacketIdx::ROOT, &self.options);
        let code = loader::render(&config, &self.options.node_env);
        let source = source_name("loader.js");
        if !minify {
            return Ok(Chunk::mapped(code, None, source));
        }
        let output = minify_script(&code, Path::new("loader.js"), Some(&source), &self.options.minify)?;
        Ok(Chunk::mapped(output.code, output.map, source))
    }
}
