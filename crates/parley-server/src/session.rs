//! Connection session state machine.
//!
//! One session per live connection. The session reads command frames,
//! applies them to the registry and answers through its own outbound queue.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────────────┐  SendFile  ┌─────────────────────┐  length  ┌──────────────────────┐
//! │ AwaitingCommand │───────────>│ ReceivingFileHeader │─────────>│ ReceivingFilePayload │
//! └─────────────────┘            └─────────────────────┘          └──────────────────────┘
//!      │    ^                              │                                │
//!      │    └──────────────────────────────┼──── payload consumed ──────────┘
//!      │ quit / stream error               │ stream error
//!      ↓                                   ↓
//! ┌────────┐                          ┌────────┐
//! │ Closed │<─────────────────────────│ Closed │
//! └────────┘                          └────────┘
//! ```
//!
//! Registry mutations and the membership snapshots used for notification are
//! taken under the registry lock in one step; the lock is released before
//! anything is delivered.

use parley_proto::{CodecError, Command, DecoderState, FrameReader, Reply};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::{
    broadcast::{Outbound, notify},
    registry::{CreateOutcome, JoinOutcome, LeaveOutcome, PostOutcome, SessionId},
    relay::Relay,
    store::{UploadError, UploadStore, sanitize_file_name},
};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Waiting for the next command frame
    AwaitingCommand,
    /// `SendFile` received; reading group, file name and length
    ReceivingFileHeader,
    /// Consuming the announced raw run
    ReceivingFilePayload {
        /// Bytes of the run still to read
        remaining: u64,
    },
    /// Session ended (quit or stream failure)
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Client sent `quit`
    Quit,
    /// Client closed the stream between frames
    Disconnected,
    /// Stream failed or carried an undecodable frame
    Error(CodecError),
}

impl From<CodecError> for CloseReason {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Closed => Self::Disconnected,
            other => Self::Error(other),
        }
    }
}

/// Server side of one connection.
pub(crate) struct Session<U> {
    relay: Relay<U>,
    id: SessionId,
    name: String,
    outbound: Outbound,
    state: SessionState,
}

impl<U: UploadStore> Session<U> {
    /// Create a session for an already registered connection.
    pub(crate) fn new(relay: Relay<U>, id: SessionId, name: String, outbound: Outbound) -> Self {
        Self { relay, id, name, outbound, state: SessionState::AwaitingCommand }
    }

    /// Current state.
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Process commands until the session closes.
    pub(crate) async fn run<R>(&mut self, reader: &mut FrameReader<R>) -> CloseReason
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let line = match reader.read_text().await {
                Ok(line) => line,
                Err(e) => return self.fail(e),
            };

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    tracing::debug!(session_id = self.id, "rejected command: {}", e);
                    self.reply(Reply::from(&e));
                    continue;
                },
            };
            tracing::debug!(session_id = self.id, kind = ?command.kind(), "command");

            match command {
                Command::Quit => {
                    self.state = SessionState::Closed;
                    return CloseReason::Quit;
                },
                Command::AddGroup { group } => self.add_group(&group).await,
                Command::JoinGroup { group } => self.join_group(&group).await,
                Command::SendMessage { group, text } => self.send_message(&group, &text).await,
                Command::LeaveGroup { group } => self.leave_group(&group).await,
                Command::RemoveGroup { group } => self.remove_group(&group).await,
                Command::SendFile => {
                    if let Err(e) = self.receive_file(reader).await {
                        return self.fail(e);
                    }
                },
            }
        }
    }

    /// Remove the session from the registry and announce the departure to
    /// every group it had joined. Groups themselves are left in place.
    pub(crate) async fn close(&mut self) {
        self.state = SessionState::Closed;
        let departure = self.relay.registry().lock().await.unregister_session(self.id);

        let Some(departure) = departure else {
            return;
        };
        for (group, remaining) in &departure.groups {
            let notice = Reply::MemberLeft { name: &departure.name, group };
            notify(remaining, None, &notice.to_string());
        }
    }

    async fn add_group(&self, group: &str) {
        let outcome = self.relay.registry().lock().await.create_group(group);
        match outcome {
            CreateOutcome::Created => self.reply(Reply::GroupCreated { group }),
            CreateOutcome::AlreadyExists => self.reply(Reply::GroupExists { group }),
        }
    }

    async fn join_group(&self, group: &str) {
        let outcome = self.relay.registry().lock().await.join(group, self.id);
        match outcome {
            JoinOutcome::Joined { others } => {
                let notice = Reply::MemberJoined { name: &self.name, group };
                notify(&others, None, &notice.to_string());
                self.reply(Reply::Joined { group });
            },
            JoinOutcome::AlreadyMember => self.reply(Reply::AlreadyMember { group }),
            JoinOutcome::NoSuchGroup => self.reply(Reply::NoSuchGroup { group }),
            JoinOutcome::UnknownSession => {
                tracing::error!(session_id = self.id, "join from unregistered session");
            },
        }
    }

    async fn send_message(&self, group: &str, text: &str) {
        let outcome = self.relay.registry().lock().await.members_for_post(group, self.id);
        match outcome {
            PostOutcome::Deliver { members } => {
                let message = Reply::Message { name: &self.name, group, text };
                notify(&members, None, &message.to_string());
            },
            PostOutcome::NotMember => self.reply(Reply::NotMember { group }),
            PostOutcome::NoSuchGroup => self.reply(Reply::NoSuchGroup { group }),
        }
    }

    async fn leave_group(&self, group: &str) {
        let outcome = self.relay.registry().lock().await.leave(group, self.id);
        match outcome {
            LeaveOutcome::Left { remaining } => {
                let notice = Reply::MemberLeft { name: &self.name, group };
                notify(&remaining, None, &notice.to_string());
                self.reply(Reply::Left { group });
            },
            LeaveOutcome::NotMember | LeaveOutcome::NoSuchGroup => {
                self.reply(Reply::CannotLeave { group });
            },
        }
    }

    async fn remove_group(&self, group: &str) {
        let evicted = self.relay.registry().lock().await.delete_group(group);
        match evicted {
            Some(evicted) => {
                notify(&evicted, None, &Reply::GroupDeleted { group }.to_string());
                self.reply(Reply::GroupRemoved { group });
            },
            None => self.reply(Reply::NoSuchGroup { group }),
        }
    }

    /// Run the file sub-protocol that follows a `SendFile` frame.
    ///
    /// Returns an error only for stream failures; refused or failed uploads
    /// are answered to the client and leave the stream aligned.
    async fn receive_file<R>(&mut self, reader: &mut FrameReader<R>) -> Result<(), CodecError>
    where
        R: AsyncRead + Unpin,
    {
        self.state = SessionState::ReceivingFileHeader;
        let group = reader.read_text().await?;
        let file_name = reader.read_text().await?;
        let declared = reader.read_length().await?;

        self.state = SessionState::ReceivingFilePayload { remaining: declared };
        tracing::debug!(session_id = self.id, %group, file = %file_name, declared, "upload started");

        let stored = self.store_payload(reader, &group, &file_name, declared).await?;
        self.state = SessionState::AwaitingCommand;

        match stored {
            Ok(written) => {
                tracing::debug!(session_id = self.id, file = %file_name, written, "upload stored");
                self.announce_upload(&group, &file_name).await;
            },
            Err(UploadError::NoSuchGroup(_)) => self.reply(Reply::NoSuchGroup { group: &group }),
            Err(e) => {
                tracing::warn!(session_id = self.id, file = %file_name, "upload failed: {}", e);
                self.reply(Reply::FileFailed { reason: &e.to_string() });
            },
        }

        Ok(())
    }

    /// Consume exactly `declared` bytes, writing them to the store if the
    /// upload is admitted. The whole run is always consumed.
    async fn store_payload<R>(
        &mut self,
        reader: &mut FrameReader<R>,
        group: &str,
        file_name: &str,
        declared: u64,
    ) -> Result<Result<u64, UploadError>, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let admitted = match self.admit_upload(group, declared).await {
            Ok(()) => self.relay.store().create(file_name).await,
            Err(refusal) => Err(refusal),
        };
        let mut sink = match admitted {
            Ok(sink) => sink,
            Err(refusal) => {
                reader.skip_raw().await?;
                return Ok(Err(refusal));
            },
        };

        let mut written = 0u64;
        let mut failure = None;
        while let Some(chunk) = reader.read_raw_chunk().await? {
            if let DecoderState::AwaitingRawRun { remaining } = reader.state() {
                self.state = SessionState::ReceivingFilePayload { remaining };
            }
            if failure.is_some() {
                continue;
            }
            match sink.write_all(&chunk).await {
                Ok(()) => written += chunk.len() as u64,
                Err(e) => failure = Some(e),
            }
        }

        if failure.is_none() {
            failure = sink.flush().await.err();
        }
        Ok(match failure {
            Some(e) => Err(UploadError::Io(e)),
            None => Ok(written),
        })
    }

    async fn admit_upload(&self, group: &str, declared: u64) -> Result<(), UploadError> {
        if !self.relay.registry().lock().await.has_group(group) {
            return Err(UploadError::NoSuchGroup(group.to_string()));
        }
        match self.relay.max_upload_bytes() {
            Some(max) if declared > max => Err(UploadError::TooLarge { declared, max }),
            _ => Ok(()),
        }
    }

    /// Tell the other members a file is available, then confirm to the
    /// sender. Only the stored name is relayed; the bytes stay in the store.
    async fn announce_upload(&self, group: &str, file_name: &str) {
        let file_name = sanitize_file_name(file_name).unwrap_or(file_name);
        let members = self.relay.registry().lock().await.lookup(group);
        match members {
            Some(members) => {
                let notice = Reply::FileAvailable { file: file_name };
                notify(&members, Some(self.id), &notice.to_string());
                self.reply(Reply::FileSent { file: file_name, group });
            },
            None => self.reply(Reply::NoSuchGroup { group }),
        }
    }

    fn fail(&mut self, err: CodecError) -> CloseReason {
        if !err.is_end_of_stream() {
            tracing::warn!(session_id = self.id, state = ?self.state(), "protocol error: {}", err);
        }
        self.state = SessionState::Closed;
        CloseReason::from(err)
    }

    fn reply(&self, reply: Reply<'_>) {
        if let Err(e) = self.outbound.send(reply.to_string()) {
            tracing::debug!(session_id = self.id, "reply dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use parley_proto::{FrameWriter, encode_length, encode_text};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::store::MemoryStore;

    async fn registered_session(
        relay: &Relay<MemoryStore>,
        id: SessionId,
    ) -> (Session<MemoryStore>, tokio::sync::mpsc::UnboundedReceiver<std::sync::Arc<str>>) {
        let (outbound, rx) = Outbound::channel(id);
        relay.registry().lock().await.register_session(id, format!("user{id}"), outbound.clone());
        (Session::new(relay.clone(), id, format!("user{id}"), outbound), rx)
    }

    fn header(group: &str, file: &str, len: u64) -> BytesMut {
        let mut wire = BytesMut::new();
        encode_text(group, &mut wire).unwrap();
        encode_text(file, &mut wire).unwrap();
        encode_length(len, &mut wire).unwrap();
        wire
    }

    fn pipe() -> (DuplexStream, FrameReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (client, FrameReader::new(server))
    }

    #[tokio::test]
    async fn upload_returns_to_awaiting_command() {
        let relay = Relay::new(MemoryStore::new(), None);
        relay.registry().lock().await.create_group("g");
        let (mut session, mut rx) = registered_session(&relay, 1).await;
        relay.registry().lock().await.join("g", 1);

        let (mut client, mut reader) = pipe();
        client.write_all(&header("g", "a.bin", 4)).await.unwrap();
        client.write_all(b"\x00\x01\x02\x03").await.unwrap();

        session.receive_file(&mut reader).await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingCommand);
        assert_eq!(relay.store().get("a.bin"), Some(vec![0, 1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "File a.bin sent to group g");
    }

    #[tokio::test]
    async fn upload_announces_stored_name() {
        let relay = Relay::new(MemoryStore::new(), None);
        relay.registry().lock().await.create_group("g");
        let (mut session, mut rx) = registered_session(&relay, 1).await;
        let (_bob, mut rx_bob) = registered_session(&relay, 2).await;
        relay.registry().lock().await.join("g", 1);
        relay.registry().lock().await.join("g", 2);

        let (mut client, mut reader) = pipe();
        client.write_all(&header("g", "../nested/a.bin", 2)).await.unwrap();
        client.write_all(b"hi").await.unwrap();

        session.receive_file(&mut reader).await.unwrap();
        assert_eq!(relay.store().get("a.bin"), Some(b"hi".to_vec()));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "File a.bin sent to group g");
        assert_eq!(rx_bob.try_recv().unwrap().as_ref(), "ReceiveFile a.bin");
    }

    #[tokio::test]
    async fn truncated_payload_fails_mid_run() {
        let relay = Relay::new(MemoryStore::new(), None);
        relay.registry().lock().await.create_group("g");
        let (mut session, _rx) = registered_session(&relay, 1).await;

        let (mut client, mut reader) = pipe();
        client.write_all(&header("g", "a.bin", 10)).await.unwrap();
        client.write_all(b"abcd").await.unwrap();
        drop(client);

        let err = session.receive_file(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof("raw payload")));
        assert_eq!(session.state(), SessionState::ReceivingFilePayload { remaining: 6 });
    }

    #[tokio::test]
    async fn missing_group_drains_payload_and_stores_nothing() {
        let relay = Relay::new(MemoryStore::new(), None);
        let (mut session, mut rx) = registered_session(&relay, 1).await;

        let (mut client, mut reader) = pipe();
        client.write_all(&header("nope", "a.bin", 3)).await.unwrap();
        client.write_all(b"xyz").await.unwrap();
        FrameWriter::new(&mut client).write_text("quit").await.unwrap();

        session.receive_file(&mut reader).await.unwrap();
        assert!(relay.store().is_empty());
        assert_eq!(rx.try_recv().unwrap().as_ref(), "Error: Group nope does not exist.");
        assert_eq!(reader.read_text().await.unwrap(), "quit");
    }

    #[tokio::test]
    async fn oversized_upload_is_refused() {
        let relay = Relay::new(MemoryStore::new(), Some(2));
        relay.registry().lock().await.create_group("g");
        let (mut session, mut rx) = registered_session(&relay, 1).await;

        let (mut client, mut reader) = pipe();
        client.write_all(&header("g", "big.bin", 3)).await.unwrap();
        client.write_all(b"123").await.unwrap();

        session.receive_file(&mut reader).await.unwrap();
        assert!(relay.store().is_empty());
        assert_eq!(
            rx.try_recv().unwrap().as_ref(),
            "Error sending file: file of 3 bytes exceeds the 2 byte limit"
        );
    }

    #[tokio::test]
    async fn close_cleans_up_and_notifies() {
        let relay = Relay::new(MemoryStore::new(), None);
        relay.registry().lock().await.create_group("g");
        let (mut alice, _rx_alice) = registered_session(&relay, 1).await;
        let (_bob, mut rx_bob) = registered_session(&relay, 2).await;
        relay.registry().lock().await.join("g", 1);
        relay.registry().lock().await.join("g", 2);

        alice.close().await;
        assert_eq!(alice.state(), SessionState::Closed);
        assert_eq!(relay.session_count().await, 1);
        assert_eq!(relay.member_names("g").await, Some(vec!["user2".to_string()]));
        assert_eq!(rx_bob.try_recv().unwrap().as_ref(), "user1 has left the group g");
        relay.check_consistency().await.unwrap();
    }

    #[test]
    fn clean_close_maps_to_disconnected() {
        assert!(matches!(CloseReason::from(CodecError::Closed), CloseReason::Disconnected));
        assert!(matches!(
            CloseReason::from(CodecError::InvalidUtf8),
            CloseReason::Error(CodecError::InvalidUtf8)
        ));
    }
}
