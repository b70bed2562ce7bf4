//! Native Runtime Implementation
//!
//! Wraps `std::fs` in `tokio::task::spawn_blocking` so disk access never
//! stalls the executor while the graph is being resolved.

// the one place allowed to touch std::fs
#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::task;

use super::{FileMetadata, Runtime, RuntimeError, RuntimeResult};

/// Native filesystem Runtime implementation using `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRuntime;

impl NativeRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> RuntimeError {
    if e.kind() == ErrorKind::NotFound {
        RuntimeError::FileNotFound(path.to_path_buf())
    } else {
        RuntimeError::Io(format!("Failed to {action} {}: {e}", path.display()))
    }
}

async fn blocking<T, F>(f: F) -> RuntimeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RuntimeResult<T> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| RuntimeError::Other(format!("Task join error: {e}")))?
}

#[async_trait]
impl Runtime for NativeRuntime {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        let path = path.to_path_buf();
        blocking(move || std::fs::read(&path).map_err(|e| io_error("read", &path, e))).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        let content = content.to_vec();

        blocking(move || {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| io_error("create", dir, e))?;
            }
            std::fs::write(&path, content).map_err(|e| io_error("write", &path, e))
        })
        .await
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        let path = path.to_path_buf();

        blocking(move || {
            let metadata =
                std::fs::symlink_metadata(&path).map_err(|e| io_error("stat", &path, e))?;
            let metadata = if metadata.file_type().is_symlink() {
                std::fs::metadata(&path).map_err(|e| io_error("stat", &path, e))?
            } else {
                metadata
            };

            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64);

            Ok(FileMetadata {
                size: metadata.len(),
                is_dir: metadata.is_dir(),
                is_file: metadata.is_file(),
                modified,
            })
        })
        .await
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()> {
        let path = path.to_path_buf();

        blocking(move || {
            let result = if recursive {
                std::fs::create_dir_all(&path)
            } else {
                std::fs::create_dir(&path)
            };
            result.map_err(|e| io_error("create directory", &path, e))
        })
        .await
    }

    async fn remove_file(&self, path: &Path) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        blocking(move || std::fs::remove_file(&path).map_err(|e| io_error("remove", &path, e)))
            .await
    }

    async fn remove_dir(&self, path: &Path) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        blocking(move || {
            std::fs::remove_dir_all(&path).map_err(|e| io_error("remove directory", &path, e))
        })
        .await
    }

    async fn canonicalize(&self, path: &Path) -> RuntimeResult<PathBuf> {
        let path = path.to_path_buf();
        blocking(move || std::fs::canonicalize(&path).map_err(|e| io_error("resolve", &path, e)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a/b/bundle.js");

        let runtime = NativeRuntime::new();
        runtime.write_file(&file_path, b"porter").await.unwrap();

        assert_eq!(runtime.read_file(&file_path).await.unwrap(), b"porter");
    }

    #[tokio::test]
    async fn missing_file_is_reported_as_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = NativeRuntime::new();

        let err = runtime
            .read_file(&temp_dir.path().join("nope.js"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn metadata_distinguishes_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("test.txt"), b"test content").unwrap();

        let runtime = NativeRuntime::new();
        let file = runtime
            .metadata(&temp_dir.path().join("test.txt"))
            .await
            .unwrap();
        assert!(file.is_file);
        assert_eq!(file.size, 12);

        let dir = runtime.metadata(temp_dir.path()).await.unwrap();
        assert!(dir.is_dir);
        assert!(!runtime.is_file(temp_dir.path()).await);
    }

    #[tokio::test]
    async fn remove_dir_is_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("cache/lodash/4.17.21");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("lodash.js.cache"), b"{}").unwrap();

        let runtime = NativeRuntime::new();
        runtime
            .remove_dir(&temp_dir.path().join("cache"))
            .await
            .unwrap();
        assert!(!runtime.exists(&temp_dir.path().join("cache")));
    }
}
