//! Shared relay state and the per-connection entry point.
//!
//! A [`Relay`] owns the group registry (behind one lock, so both halves of the
//! membership relation change together), the upload store, and the session ID
//! counter. Every connection, whatever its transport, is served through
//! [`Relay::serve`].

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parley_proto::{CodecError, FrameReader, FrameWriter};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};

use crate::{
    broadcast::{self, Outbound},
    registry::GroupRegistry,
    session::{CloseReason, Session},
    store::UploadStore,
};

struct RelayInner<U> {
    registry: Mutex<GroupRegistry<Outbound>>,
    store: U,
    max_upload_bytes: Option<u64>,
    next_session_id: AtomicU64,
}

/// Shared state for all connections.
///
/// Clones are cheap and refer to the same relay.
pub struct Relay<U> {
    inner: Arc<RelayInner<U>>,
}

impl<U> Clone for Relay<U> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<U: UploadStore> Relay<U> {
    /// Create a relay storing uploads in `store`.
    pub fn new(store: U, max_upload_bytes: Option<u64>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                registry: Mutex::new(GroupRegistry::new()),
                store,
                max_upload_bytes,
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Serve one bidirectional connection until it closes.
    pub async fn serve<S>(&self, stream: S) -> Result<CloseReason, CodecError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.serve_split(reader, writer).await
    }

    /// Serve a connection given as separate read and write halves.
    ///
    /// Reads the opening name frame, registers the session, runs it to
    /// completion and cleans up. Returns an error only if the connection
    /// fails before the name frame arrives.
    pub async fn serve_split<R, W>(&self, reader: R, writer: W) -> Result<CloseReason, CodecError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = FrameReader::new(reader);
        let name = reader.read_text().await?;

        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = Outbound::channel(session_id);
        tokio::spawn(broadcast::run_writer(session_id, rx, FrameWriter::new(writer)));

        self.inner.registry.lock().await.register_session(
            session_id,
            name.clone(),
            outbound.clone(),
        );
        tracing::info!(session_id, %name, "session connected");

        let mut session = Session::new(self.clone(), session_id, name, outbound);
        let reason = session.run(&mut reader).await;
        session.close().await;

        match &reason {
            CloseReason::Error(e) => tracing::info!(session_id, "session closed: {}", e),
            _ => tracing::info!(session_id, ?reason, "session closed"),
        }
        Ok(reason)
    }

    /// Number of connected sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.registry.lock().await.session_count()
    }

    /// Names of all groups, sorted.
    pub async fn group_names(&self) -> Vec<String> {
        let registry = self.inner.registry.lock().await;
        let mut names: Vec<String> = registry.group_names().map(str::to_string).collect();
        names.sort_unstable();
        names
    }

    /// Display names of a group's members. `None` if the group doesn't exist.
    pub async fn member_names(&self, group: &str) -> Option<Vec<String>> {
        self.inner.registry.lock().await.member_names(group)
    }

    /// Verify the registry's bidirectional membership invariant.
    pub async fn check_consistency(&self) -> Result<(), String> {
        self.inner.registry.lock().await.check_consistency()
    }

    /// Upload store shared by all sessions.
    pub fn store(&self) -> &U {
        &self.inner.store
    }

    pub(crate) fn registry(&self) -> &Mutex<GroupRegistry<Outbound>> {
        &self.inner.registry
    }

    pub(crate) fn max_upload_bytes(&self) -> Option<u64> {
        self.inner.max_upload_bytes
    }
}
