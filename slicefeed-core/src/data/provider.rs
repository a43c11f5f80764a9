//! Storage provider trait and structured data error types.
//!
//! The StorageProvider trait abstracts over where raw bytes live (local disk,
//! an object store, an in-memory fixture) so the cache provider can be tested
//! against a counting stub.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structured error types for data access.
///
/// None of these are fatal to a run; callers turn them into "no data for this
/// unit" and report them.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: String, reason: String },

    #[error("archive {path} has no member '{member}'")]
    MemberNotFound { path: String, member: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("hard stop: remote source has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    pub fn io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if err.kind() == std::io::ErrorKind::NotFound {
            DataError::NotFound { path }
        } else {
            DataError::Io { path, reason: err.to_string() }
        }
    }
}

/// Where raw bytes come from.
pub trait StorageProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Open `path` for reading. A missing file is `DataError::NotFound`.
    fn fetch(&self, path: &str) -> Result<Box<dyn Read + Send>, DataError>;
}

/// Reads files from a local data folder. Relative paths resolve against `root`.
#[derive(Debug, Clone)]
pub struct LocalDiskProvider {
    root: PathBuf,
}

impl LocalDiskProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl StorageProvider for LocalDiskProvider {
    fn name(&self) -> &str {
        "local-disk"
    }

    fn fetch(&self, path: &str) -> Result<Box<dyn Read + Send>, DataError> {
        let full = self.resolve(path);
        let file = File::open(&full).map_err(|e| DataError::io(&full, e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}
