//! Content-addressed store of transpilation results.
//!
//! Records live at `{cache-root}/{moduleId}.cache` and carry the digest of
//! the source they were produced from. The digest is salted with a
//! fingerprint of the transpiler setup, so changing transpiler options turns
//! every existing record into a miss without touching the disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use blake3::Hasher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::runtime::{Runtime, RuntimeError};

const SALT_FILE: &str = "salt.cache";
const RECORD_EXT: &str = ".cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache prepare failed at {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to write cache record {key}: {message}")]
    Write { key: String, message: String },
}

/// One persisted transpilation result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<Value>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub dynamic_imports: Vec<String>,
    #[serde(default)]
    pub minified: bool,
    #[serde(rename = "__esModule", default)]
    pub es_module: bool,
    /// Class name mapping of a scoped stylesheet, as a `porter.define` call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<String>,
    #[serde(default)]
    pub digest: String,
}

/// What goes into the salt.
#[derive(Debug, Clone, Default)]
pub struct CacheIdentity {
    pub transpiler: Option<(String, String, Value)>,
    pub minify: Value,
}

#[derive(Debug)]
pub struct Cache {
    runtime: Arc<dyn Runtime>,
    path: PathBuf,
    salt: RwLock<String>,
    reloaded: AtomicBool,
}

impl Cache {
    pub fn new(runtime: Arc<dyn Runtime>, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
            salt: RwLock::new(String::new()),
            reloaded: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn salt(&self) -> String {
        self.salt.read().clone()
    }

    /// Whether the salt changed since the last run.
    pub fn reloaded(&self) -> bool {
        self.reloaded.load(Ordering::Relaxed)
    }

    /// Fingerprint of the engine version and transpiler setup.
    pub fn identifier(identity: &CacheIdentity) -> String {
        let transpiler = match &identity.transpiler {
            Some((name, version, options)) => json!({
                "name": name,
                "version": version,
                "options": options,
            }),
            None => json!({}),
        };
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "transpiler": transpiler,
            "minify": identity.minify,
        })
        .to_string()
    }

    /// `hash(salt ‖ source)` as hex.
    pub fn digest(&self, source: &[u8]) -> String {
        let mut hasher = Hasher::new();
        hasher.update(self.salt.read().as_bytes());
        hasher.update(source);
        hasher.finalize().to_hex().to_string()
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{RECORD_EXT}"))
    }

    /// Look up a record, returning it only when it was produced from
    /// `source` under the current salt. Broken records count as misses.
    pub async fn get(&self, key: &str, source: &[u8]) -> Option<CacheRecord> {
        let path = self.record_path(key);
        let content = self.runtime.read_file(&path).await.ok()?;
        if content.is_empty() {
            return None;
        }

        let record: CacheRecord = match serde_json::from_slice(&content) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("cache broken {key}{RECORD_EXT}: {e}");
                return None;
            }
        };

        (record.digest == self.digest(source)).then_some(record)
    }

    /// Persist `record` for `key`, stamped with the digest of `source`.
    pub async fn set(&self, key: &str, source: &[u8], record: &CacheRecord) -> Result<(), CacheError> {
        let record = CacheRecord {
            digest: self.digest(source),
            ..record.clone()
        };
        let content = serde_json::to_vec(&record).map_err(|e| CacheError::Write {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.runtime
            .write_file(&self.record_path(key), &content)
            .await
            .map_err(|e| CacheError::Write {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Drop one record. A missing record is not an error.
    pub async fn remove(&self, key: &str) {
        match self.runtime.remove_file(&self.record_path(key)).await {
            Err(e) if !e.is_not_found() => {
                tracing::warn!("failed to remove cache record {key}: {e}");
            }
            _ => {}
        }
    }

    /// Adopt `salt` and persist it next to the records.
    ///
    /// A changed salt does not purge existing records; they simply stop
    /// matching. `clean` wipes the cache directory first.
    pub async fn prepare(&self, salt: String, clean: bool) -> Result<(), CacheError> {
        if clean && self.runtime.exists(&self.path) {
            tracing::debug!("cleaning cache {}", self.path.display());
            self.runtime
                .remove_dir(&self.path)
                .await
                .map_err(|source| CacheError::Prepare {
                    path: self.path.clone(),
                    source,
                })?;
        }

        let salt_path = self.path.join(SALT_FILE);
        let previous = self
            .runtime
            .read_to_string(&salt_path)
            .await
            .unwrap_or_default();

        let changed = previous != salt;
        if changed {
            tracing::debug!("cache salt changed from {previous:?} to {salt:?}");
            self.runtime
                .write_file(&salt_path, salt.as_bytes())
                .await
                .map_err(|source| CacheError::Prepare {
                    path: salt_path.clone(),
                    source,
                })?;
        }

        *self.salt.write() = salt;
        self.reloaded.store(changed, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_utils::TestRuntime;

    fn record(code: &str) -> CacheRecord {
        CacheRecord {
            code: code.to_string(),
            imports: vec!["./b".to_string()],
            ..CacheRecord::default()
        }
    }

    #[tokio::test]
    async fn round_trips_records_for_the_same_source() {
        let cache = Cache::new(Arc::new(TestRuntime::new()), "/cache");
        cache.prepare("salt".into(), false).await.unwrap();

        cache.set("a.js", b"source", &record("compiled")).await.unwrap();
        let hit = cache.get("a.js", b"source").await.unwrap();
        assert_eq!(hit.code, "compiled");
        assert_eq!(hit.imports, vec!["./b"]);
        assert!(cache.get("a.js", b"other source").await.is_none());
    }

    #[tokio::test]
    async fn salt_change_turns_hits_into_misses() {
        let runtime = Arc::new(TestRuntime::new());
        let cache = Cache::new(runtime.clone(), "/cache");
        cache.prepare("one".into(), false).await.unwrap();
        cache.set("a.js", b"source", &record("compiled")).await.unwrap();

        let cache = Cache::new(runtime.clone(), "/cache");
        cache.prepare("two".into(), false).await.unwrap();
        assert!(cache.reloaded());
        assert!(cache.get("a.js", b"source").await.is_none());
        // stale record stays on disk
        assert!(runtime.contains("/cache/a.js.cache"));
    }

    #[tokio::test]
    async fn broken_records_are_misses() {
        let runtime = Arc::new(TestRuntime::with_files([("/cache/a.js.cache", "{not json")]));
        let cache = Cache::new(runtime, "/cache");
        cache.prepare("salt".into(), false).await.unwrap();
        assert!(cache.get("a.js", b"source").await.is_none());
    }

    #[tokio::test]
    async fn clean_prepare_purges_records() {
        let runtime = Arc::new(TestRuntime::with_files([("/cache/a.js.cache", "{}")]));
        let cache = Cache::new(runtime.clone(), "/cache");
        cache.prepare("salt".into(), true).await.unwrap();
        assert!(!runtime.contains("/cache/a.js.cache"));
        assert!(runtime.contains("/cache/salt.cache"));
    }

    #[test]
    fn identifier_reflects_transpiler_options() {
        let plain = Cache::identifier(&CacheIdentity::default());
        let custom = Cache::identifier(&CacheIdentity {
            transpiler: Some(("swc".into(), "1.0.0".into(), json!({ "jsx": true }))),
            minify: Value::Null,
        });
        assert_ne!(plain, custom);
        assert!(custom.contains("\"jsx\":true"));
    }
}
