//! Upload storage for relayed files.
//!
//! Trait-based abstraction over where an announced file's bytes end up.
//! Stored names are derived only from the announced file name, so two
//! uploads with the same name overwrite each other (last write wins).

#![allow(clippy::disallowed_types, reason = "MemoryStore guards plain maps with std Mutex")]

use std::{
    collections::HashMap,
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use thiserror::Error;
use tokio::io::AsyncWrite;

/// Why an upload was not stored.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The target group does not exist
    #[error("group {0} does not exist")]
    NoSuchGroup(String),

    /// The announced name has no usable final path component
    #[error("invalid file name {0:?}")]
    InvalidName(String),

    /// The declared length exceeds the configured bound
    #[error("file of {declared} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Declared length
        declared: u64,
        /// Configured bound
        max: u64,
    },

    /// Writing the payload failed
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Destination for relayed payloads.
///
/// Must be Clone (shared by every session) and thread-safe. Implementations
/// typically share internal state via Arc.
pub trait UploadStore: Clone + Send + Sync + 'static {
    /// Writer receiving one payload.
    type Sink: AsyncWrite + Unpin + Send;

    /// Open a sink for `file_name`, replacing any earlier upload of the same
    /// name.
    fn create(&self, file_name: &str) -> impl Future<Output = Result<Self::Sink, UploadError>> + Send;
}

/// Final path component of an announced name.
///
/// Directory parts are stripped so an upload cannot escape the store;
/// names without a normal final component (`""`, `".."`, `"/"`) are
/// rejected.
pub fn sanitize_file_name(file_name: &str) -> Result<&str, UploadError> {
    Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| UploadError::InvalidName(file_name.to_string()))
}

/// Stores uploads as files in one directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    prefix: String,
}

impl DiskStore {
    /// Store uploads in `dir` as `<prefix><file name>`.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { dir: dir.into(), prefix: prefix.into() }
    }

    /// Path an upload named `file_name` is stored at.
    pub fn path_for(&self, file_name: &str) -> Result<PathBuf, UploadError> {
        let name = sanitize_file_name(file_name)?;
        Ok(self.dir.join(format!("{}{name}", self.prefix)))
    }
}

impl UploadStore for DiskStore {
    type Sink = tokio::fs::File;

    async fn create(&self, file_name: &str) -> Result<Self::Sink, UploadError> {
        let path = self.path_for(file_name)?;
        let file = tokio::fs::File::create(&path).await?;
        tracing::debug!(path = %path.display(), "upload file created");
        Ok(file)
    }
}

/// In-memory upload store for testing
///
/// Keys are sanitized file names without any prefix.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents stored under `file_name`.
    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(file_name).cloned()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.lock().map_or(0, |files| files.len())
    }

    /// Whether no file has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UploadStore for MemoryStore {
    type Sink = MemorySink;

    async fn create(&self, file_name: &str) -> Result<Self::Sink, UploadError> {
        let key = sanitize_file_name(file_name)?.to_string();
        let mut files = self.files.lock().map_err(|_| poisoned())?;
        files.insert(key.clone(), Vec::new());
        Ok(MemorySink { key, files: Arc::clone(&self.files) })
    }
}

/// Sink appending into a [`MemoryStore`] entry.
#[derive(Debug)]
pub struct MemorySink {
    key: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut files = self.files.lock().map_err(|_| poisoned())?;
        files.entry(self.key.clone()).or_default().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn poisoned() -> io::Error {
    io::Error::other("memory store lock poisoned")
}
