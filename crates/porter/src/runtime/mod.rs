//! Platform runtime abstraction
//!
//! Every filesystem access of the engine goes through [`Runtime`], so graph
//! construction and bundling can run against the real disk or an in-memory
//! tree in tests.

pub mod native;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur during runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Other runtime error
    #[error("Runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::FileNotFound(_))
    }
}

/// File metadata
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Whether this is a file
    pub is_file: bool,
    /// Last modified timestamp (milliseconds since epoch)
    pub modified: Option<u64>,
}

/// Platform runtime trait
#[async_trait]
pub trait Runtime: Send + Sync + std::fmt::Debug {
    /// Read a file from the filesystem
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>>;

    /// Write a file, creating missing parent directories
    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()>;

    /// Get file metadata without following a trailing symlink
    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata>;

    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Create a directory
    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()>;

    /// Remove a file
    async fn remove_file(&self, path: &Path) -> RuntimeResult<()>;

    /// Remove a directory and everything below it
    async fn remove_dir(&self, path: &Path) -> RuntimeResult<()>;

    /// Resolve symlinks, returning the real path
    async fn canonicalize(&self, path: &Path) -> RuntimeResult<PathBuf>;

    /// Read a file as UTF-8
    async fn read_to_string(&self, path: &Path) -> RuntimeResult<String> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes)
            .map_err(|e| RuntimeError::Io(format!("{} is not valid UTF-8: {e}", path.display())))
    }

    /// Whether `path` is a regular file
    async fn is_file(&self, path: &Path) -> bool {
        self.metadata(path).await.map(|m| m.is_file).unwrap_or(false)
    }

    /// Whether `path` is a directory
    async fn is_dir(&self, path: &Path) -> bool {
        self.metadata(path).await.map(|m| m.is_dir).unwrap_or(false)
    }
}
