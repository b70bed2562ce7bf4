//! The read-file boundary consumed by HTTP adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use porter_config::SourceConfig;

use super::Engine;
use crate::bundle::sourcemap::set_source_map;
use crate::bundle::{Bundle, BundleSpec};
use crate::constants::{CONTENT_HASH, Format, STATIC_ASSET, extname, parse_module_id, replace_ext};
use crate::error::Result;
use crate::graph::PacketIdx;
use crate::loader;

/// Flags of a read request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadQuery {
    /// `?main`: the entry bundle with the loader bootstrap.
    pub main: bool,
    /// `?entry`: parse the requested file as a root entry.
    pub entry: bool,
}

impl ReadQuery {
    /// Flags from a raw query string such as `main&v=2`.
    pub fn parse(query: &str) -> Self {
        let mut result = Self::default();
        for pair in query.split('&') {
            match pair.split_once('=').map_or(pair, |(key, _)| key) {
                "main" => result.main = true,
                "entry" => result.entry = true,
                _ => {}
            }
        }
        result
    }
}

/// Body and metadata of a served file.
#[derive(Debug, Clone)]
pub struct FileResponse {
    pub content: Vec<u8>,
    pub content_type: &'static str,
    /// Quoted BLAKE3 hex digest of `content`.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl FileResponse {
    fn new(content: Vec<u8>, content_type: &'static str, last_modified: DateTime<Utc>) -> Self {
        let etag = format!("\"{}\"", blake3::hash(&content).to_hex());
        Self {
            content,
            content_type,
            etag,
            last_modified,
        }
    }

    /// Response headers in HTTP form.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Cache-Control", "max-age=0".to_string()),
            ("Content-Type", self.content_type.to_string()),
            ("ETag", self.etag.clone()),
            (
                "Last-Modified",
                self.last_modified
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            ),
        ]
    }
}

/// Determine content type from file extension.
fn content_type(path: &str) -> &'static str {
    match extname(path).trim_start_matches('.').to_ascii_lowercase().as_str() {
        "wasm" => "application/wasm",
        "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" => "application/javascript",
        "json" | "map" => "application/json",
        "css" => "text/css",
        "less" | "scss" | "sass" => "text/plain",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "swf" => "application/x-shockwave-flash",
        _ => "application/octet-stream",
    }
}

fn timestamp(millis: Option<u64>) -> DateTime<Utc> {
    millis
        .and_then(|ms| i64::try_from(ms).ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

impl Engine {
    pub(super) async fn read_file(&self, path: &str, query: ReadQuery) -> Result<Option<FileResponse>> {
        self.ready(false).await?;
        let path = path.trim_start_matches('/');

        if path == "loader.js" {
            let config = self.graph.lock().loader_config(PacketIdx::ROOT, &self.options);
            let code = loader::render(&config, &self.options.node_env);
            return Ok(Some(FileResponse::new(
                code.into_bytes(),
                "application/javascript",
                Utc::now(),
            )));
        }

        if path == "loaderConfig.json" {
            let config = {
                let graph = self.graph.lock();
                let mut config = graph.loader_config(PacketIdx::ROOT, &self.options);
                config["lock"] = graph.lock(PacketIdx::ROOT);
                config
            };
            return Ok(Some(FileResponse::new(
                serde_json::to_vec(&config)?,
                "application/json",
                Utc::now(),
            )));
        }

        if self.options.source.serve {
            if let Some(response) = self.read_raw(path).await? {
                return Ok(Some(response));
            }
        }

        if matches!(extname(path), ".js" | ".css" | ".map" | ".wasm") {
            if let Some(response) = self.read_bundle(path, query).await? {
                return Ok(Some(response));
            }
        }

        if STATIC_ASSET.is_match(path) {
            let paths = self.graph.lock().root().paths.clone();
            for dir in paths {
                if let Some(response) = self.read_path(&dir.join(path), path).await? {
                    return Ok(Some(response));
                }
            }
        }
        Ok(None)
    }

    async fn read_path(&self, fpath: &Path, path: &str) -> Result<Option<FileResponse>> {
        let Ok(metadata) = self.runtime.metadata(fpath).await else {
            return Ok(None);
        };
        if !metadata.is_file {
            return Ok(None);
        }
        let content = self.runtime.read_file(fpath).await?;
        Ok(Some(FileResponse::new(
            content,
            content_type(path),
            timestamp(metadata.modified),
        )))
    }

    /// Raw sources under the packet paths, or of known packages under
    /// `node_modules/`.
    async fn read_raw(&self, path: &str) -> Result<Option<FileResponse>> {
        if path.split('/').any(|segment| segment == "..") {
            return Ok(None);
        }
        let fpath = self.options.root.join(path);
        let allowed = {
            let graph = self.graph.lock();
            match path.strip_prefix("node_modules/") {
                Some(rest) => parse_module_id(rest)
                    .is_some_and(|parts| graph.find(PacketIdx::ROOT, parts.name, None).is_some()),
                None => graph.root().paths.iter().any(|dir| fpath.starts_with(dir)),
            }
        };
        if !allowed {
            return Ok(None);
        }
        self.read_path(&fpath, path).await
    }

    async fn read_bundle(&self, path: &str, query: ReadQuery) -> Result<Option<FileResponse>> {
        let is_map = path.ends_with(".map");
        let id = path.strip_suffix(".map").unwrap_or(path);
        let id = CONTENT_HASH.replace(id, "$1").into_owned();
        let is_entry = query.entry || (query.main && extname(&id) == ".js");

        let bundle = match self.parse_id(&id, is_entry).await? {
            Some(bundle) => bundle,
            None if extname(&id) == ".css" => {
                let Some(script) = self.parse_id(&replace_ext(&id, ".js"), true).await? else {
                    return Ok(None);
                };
                let outkey = replace_ext(&script.outkey(), ".css");
                let css = self.graph.lock().packet(script.packet).bundles.get(&outkey).cloned();
                match css {
                    Some(css) => css,
                    None => return Ok(None),
                }
            }
            None => return Ok(None),
        };

        let output = self.obtain_bundle(&bundle, false).await?;
        let last_modified = self.last_modified(&bundle).await;
        if bundle.format == Format::Wasm {
            return Ok(Some(FileResponse::new(
                output.code.to_vec(),
                "application/wasm",
                last_modified,
            )));
        }

        let source = SourceConfig {
            inline: true,
            ..self.options.source.clone()
        };
        let map = output.map.as_deref().cloned().unwrap_or_default();
        let (code, map) = set_source_map(&output.code, &map, bundle.format, &id, &source);
        let response = if is_map {
            FileResponse::new(serde_json::to_vec(&map)?, "application/json", last_modified)
        } else {
            FileResponse::new(code, content_type(&id), last_modified)
        };
        Ok(Some(response))
    }

    /// Modification time of the bundle's entry module; now for synthetic
    /// entries.
    async fn last_modified(&self, bundle: &Bundle) -> DateTime<Utc> {
        let fpath: Option<PathBuf> = {
            let graph = self.graph.lock();
            graph
                .packet(bundle.packet)
                .files
                .get(&bundle.entry())
                .map(|&idx| graph.module(idx))
                .filter(|module| !module.fake)
                .map(|module| module.fpath.clone())
        };
        match fpath {
            Some(fpath) => match self.runtime.metadata(&fpath).await {
                Ok(metadata) => timestamp(metadata.modified),
                Err(_) => Utc::now(),
            },
            None => Utc::now(),
        }
    }

    /// Bundle serving the output id `id`, resolving and parsing on demand.
    /// Concurrent lookups of one id share a single resolution.
    pub(super) async fn parse_id(&self, id: &str, is_entry: bool) -> Result<Option<Arc<Bundle>>> {
        self.id_flights
            .run((id.to_string(), is_entry), || self.resolve_id(id, is_entry))
            .await
    }

    async fn resolve_id(&self, id: &str, is_entry: bool) -> Result<Option<Arc<Bundle>>> {
        let (packet, file) = {
            let graph = self.graph.lock();
            match parse_module_id(id) {
                Some(parts) if parts.version.is_some() => {
                    match graph.find(PacketIdx::ROOT, parts.name, parts.version) {
                        Some(packet) => (packet, parts.file.unwrap_or_default().to_string()),
                        None => return Ok(None),
                    }
                }
                _ => (PacketIdx::ROOT, id.to_string()),
            }
        };

        let known = {
            let graph = self.graph.lock();
            let p = graph.packet(packet);
            p.bundles.contains_key(&file) || p.files.contains_key(&file)
        };
        if !known {
            let parsed = if is_entry && packet == PacketIdx::ROOT {
                self.parse_entry(packet, &file).await?.is_some()
            } else {
                self.parse_file(packet, &file).await?.module().is_some()
            };
            if !parsed {
                return Ok(None);
            }
            self.reload().await?;
        }

        let existing = self.graph.lock().packet(packet).bundles.get(&file).cloned();
        if let Some(bundle) = existing {
            return Ok(Some(bundle));
        }
        if !self.graph.lock().packet(packet).files.contains_key(&file) {
            return Ok(None);
        }

        let bundles = self.wrap(BundleSpec {
            all: self.has_preload(),
            ..BundleSpec::new(packet, Some(vec![file.clone()]))
        });
        let bundle = self.graph.lock().packet(packet).bundles.get(&file).cloned();
        Ok(bundle.or_else(|| bundles.into_iter().next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_flags() {
        assert_eq!(
            ReadQuery::parse("main&v=2"),
            ReadQuery {
                main: true,
                entry: false
            }
        );
        assert!(ReadQuery::parse("entry=1").entry);
        assert_eq!(ReadQuery::parse(""), ReadQuery::default());
    }

    #[test]
    fn headers_carry_etag_and_http_date() {
        let modified = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let response = FileResponse::new(b"body".to_vec(), "text/css", modified);
        let headers = response.headers();

        assert!(headers.contains(&("Cache-Control", "max-age=0".to_string())));
        assert!(headers.contains(&("Last-Modified", "Fri, 01 Mar 2024 08:30:00 GMT".to_string())));
        let etag = &headers.iter().find(|(name, _)| *name == "ETag").unwrap().1;
        assert_eq!(etag.len(), 66);
    }

    #[test]
    fn guesses_content_types() {
        assert_eq!(content_type("home.js"), "application/javascript");
        assert_eq!(content_type("home.js.map"), "application/json");
        assert_eq!(content_type("logo.PNG"), "image/png");
    }
}
