//! In-memory runtime for tests.
//!
//! Directories exist implicitly whenever a file lives below them, which keeps
//! fixtures down to a list of `(path, content)` pairs.

use async_trait::async_trait;
use parking_lot::Mutex;
use path_clean::PathClean;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{FileMetadata, Runtime, RuntimeError, RuntimeResult};

#[derive(Debug, Clone)]
struct Entry {
    content: Vec<u8>,
    modified: u64,
}

#[derive(Debug, Default)]
pub struct TestRuntime {
    files: Mutex<BTreeMap<PathBuf, Entry>>,
    clock: AtomicU64,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a runtime pre-populated with files.
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<Path>,
        C: AsRef<[u8]>,
    {
        let runtime = Self::new();
        for (path, content) in files {
            runtime.insert(path, content);
        }
        runtime
    }

    /// Insert or replace a file, bumping its modification time.
    pub fn insert(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) {
        let modified = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.files.lock().insert(
            path.as_ref().to_path_buf().clean(),
            Entry {
                content: content.as_ref().to_vec(),
                modified,
            },
        );
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files
            .lock()
            .contains_key(&path.as_ref().to_path_buf().clean())
    }

    /// Every stored path, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().keys().cloned().collect()
    }

    fn has_dir(&self, path: &Path) -> bool {
        let path = path.to_path_buf().clean();
        self.files
            .lock()
            .keys()
            .any(|file| file != &path && file.starts_with(&path))
    }
}

#[async_trait]
impl Runtime for TestRuntime {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        self.files
            .lock()
            .get(&path.to_path_buf().clean())
            .map(|entry| entry.content.clone())
            .ok_or_else(|| RuntimeError::FileNotFound(path.to_path_buf()))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()> {
        self.insert(path, content);
        Ok(())
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        if let Some(entry) = self.files.lock().get(&path.to_path_buf().clean()) {
            return Ok(FileMetadata {
                size: entry.content.len() as u64,
                is_dir: false,
                is_file: true,
                modified: Some(entry.modified),
            });
        }
        if self.has_dir(path) {
            return Ok(FileMetadata {
                size: 0,
                is_dir: true,
                is_file: false,
                modified: None,
            });
        }
        Err(RuntimeError::FileNotFound(path.to_path_buf()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.contains(path) || self.has_dir(path)
    }

    async fn create_dir(&self, _path: &Path, _recursive: bool) -> RuntimeResult<()> {
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> RuntimeResult<()> {
        self.files
            .lock()
            .remove(&path.to_path_buf().clean())
            .map(|_| ())
            .ok_or_else(|| RuntimeError::FileNotFound(path.to_path_buf()))
    }

    async fn remove_dir(&self, path: &Path) -> RuntimeResult<()> {
        let path = path.to_path_buf().clean();
        self.files.lock().retain(|file, _| !file.starts_with(&path));
        Ok(())
    }

    async fn canonicalize(&self, path: &Path) -> RuntimeResult<PathBuf> {
        if self.exists(path) {
            Ok(path.to_path_buf().clean())
        } else {
            Err(RuntimeError::FileNotFound(path.to_path_buf()))
        }
    }
}
