//! Outbound sinks and group broadcast.
//!
//! Each session owns one outbound queue drained by a dedicated writer task,
//! which is the only code that touches the session's write half. Replies and
//! broadcasts from any session are enqueued here, so frames never interleave
//! on the wire and a slow socket only backs up its own queue.
//!
//! [`notify`] is called with a membership snapshot after the registry lock
//! has been released. Failing to enqueue for one member (its writer has
//! already exited) is logged and skipped; that member's own connection task
//! performs its cleanup.

use std::sync::Arc;

use parley_proto::{CodecError, FrameWriter};
use tokio::{io::AsyncWrite, sync::mpsc};

use crate::registry::{Member, SessionId};

/// Handle to one session's outbound queue.
///
/// Clones are cheap and share the same queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<Arc<str>>,
}

/// The recipient's writer is gone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session {0} is no longer accepting frames")]
pub struct DeliveryError(pub SessionId);

impl Outbound {
    /// Create a queue for `session_id`. The receiver goes to
    /// [`run_writer`].
    pub fn channel(session_id: SessionId) -> (Self, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session_id, tx }, rx)
    }

    /// Enqueue one text frame. Never blocks.
    pub fn send(&self, text: impl Into<Arc<str>>) -> Result<(), DeliveryError> {
        self.tx.send(text.into()).map_err(|_| DeliveryError(self.session_id))
    }
}

/// Outcome of one [`notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Members the payload was enqueued for
    pub delivered: usize,
    /// Members whose writer was gone
    pub failed: usize,
}

/// Deliver `payload` to every member, skipping `exclude` if given.
///
/// Per-member failures are isolated: they are counted and logged, and
/// delivery continues with the remaining members.
pub fn notify(
    members: &[Member<Outbound>],
    exclude: Option<SessionId>,
    payload: &str,
) -> DeliveryReport {
    let payload: Arc<str> = Arc::from(payload);
    let mut report = DeliveryReport::default();

    for member in members {
        if Some(member.session_id) == exclude {
            continue;
        }
        match member.sink.send(Arc::clone(&payload)) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                tracing::debug!(session_id = member.session_id, "broadcast skipped: {}", e);
            },
        }
    }

    report
}

/// Drain a session's outbound queue onto its write half.
///
/// Runs until every [`Outbound`] clone is dropped or the peer stops
/// accepting bytes, then shuts the write half down. Frames too long to
/// encode are dropped with a warning; I/O errors end the writer.
pub async fn run_writer<W>(
    session_id: SessionId,
    mut rx: mpsc::UnboundedReceiver<Arc<str>>,
    mut writer: FrameWriter<W>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(text) = rx.recv().await {
        if let Err(e) = write_batch(&mut writer, &mut rx, text).await {
            tracing::debug!(session_id, "writer stopped: {}", e);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(session_id, "writer shutdown failed: {}", e);
    }
}

/// Write `first` and whatever else is already queued, then flush once.
async fn write_batch<W>(
    writer: &mut FrameWriter<W>,
    rx: &mut mpsc::UnboundedReceiver<Arc<str>>,
    first: Arc<str>,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut next = Some(first);
    while let Some(text) = next {
        match writer.write_text(&text).await {
            Ok(()) => {},
            Err(CodecError::TextTooLong { len, max }) => {
                tracing::warn!(len, max, "dropping outbound frame that exceeds the frame limit");
            },
            Err(e) => return Err(e),
        }
        next = rx.try_recv().ok();
    }
    writer.flush().await
}
