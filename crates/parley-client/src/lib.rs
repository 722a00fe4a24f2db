//! Parley client.
//!
//! Thin async layer over the wire protocol: it sends the opening name frame,
//! renders commands, streams uploads and hands back whatever text the server
//! sends. It keeps no group state of its own; the server's replies are the
//! only source of truth.
//!
//! ```no_run
//! # async fn demo() -> Result<(), parley_client::ClientError> {
//! use parley_client::Client;
//! use parley_proto::Command;
//!
//! let mut client = Client::connect("127.0.0.1:7777", "alice").await?;
//! client.send(&Command::AddGroup { group: "rust".into() }).await?;
//! while let Some(line) = client.recv().await? {
//!     tracing::info!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{io, path::Path};

use parley_proto::{CodecError, Command, CommandKind, FrameReader, FrameWriter};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

/// Bytes read from an upload source per write.
const UPLOAD_CHUNK: usize = 8 * 1024;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("connection failed: {0}")]
    Connect(io::Error),

    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Local I/O failed (reading an upload source).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// `SendFile` was passed to [`Client::send`]; uploads need their header
    /// and payload, so they go through [`Client::send_file`].
    #[error("file uploads must use send_file")]
    FileCommand,
}

/// Connected client.
#[derive(Debug)]
pub struct Client<R = OwnedReadHalf, W = OwnedWriteHalf> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl Client {
    /// Connect over TCP and introduce ourselves as `name`.
    pub async fn connect(addr: impl ToSocketAddrs, name: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        let (reader, writer) = stream.into_split();
        Self::handshake(reader, writer, name).await
    }
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an already open stream pair and send the name frame.
    pub async fn handshake(reader: R, writer: W, name: &str) -> Result<Self, ClientError> {
        let mut client = Self { reader: FrameReader::new(reader), writer: FrameWriter::new(writer) };
        client.send_text(name).await?;
        tracing::debug!(%name, "handshake sent");
        Ok(client)
    }

    /// Send one command.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        if command.kind() == CommandKind::SendFile {
            return Err(ClientError::FileCommand);
        }
        self.send_text(&command.to_string()).await
    }

    /// Send one text frame as is.
    ///
    /// Lets callers send lines the server should reject, or commands typed by
    /// a user.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.writer.write_text(text).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Upload `len` bytes read from `source` as `file_name` to `group`.
    ///
    /// The length is announced before any payload byte is sent, so `source`
    /// must yield at least `len` bytes. If it runs short the upload cannot be
    /// completed and the connection is no longer usable.
    pub async fn send_file<S>(
        &mut self,
        group: &str,
        file_name: &str,
        len: u64,
        mut source: S,
    ) -> Result<(), ClientError>
    where
        S: AsyncRead + Unpin,
    {
        self.writer.write_text(CommandKind::SendFile.keyword()).await?;
        self.writer.write_text(group).await?;
        self.writer.write_text(file_name).await?;
        self.writer.write_length(len).await?;

        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
            let read = source.read(&mut buf[..want]).await?;
            if read == 0 {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("upload source ended with {remaining} bytes still announced"),
                )));
            }
            self.writer.write_raw(&buf[..read]).await?;
            remaining -= read as u64;
        }

        self.writer.flush().await?;
        tracing::debug!(%group, file = %file_name, len, "upload sent");
        Ok(())
    }

    /// Upload the file at `path` to `group` under its final path component.
    pub async fn send_file_path(&mut self, group: &str, path: &Path) -> Result<(), ClientError> {
        let file_name = path.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no file name in {}", path.display()))
        })?;
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        self.send_file(group, file_name, len, file).await
    }

    /// Next text from the server. `None` once the server has closed the
    /// connection.
    pub async fn recv(&mut self) -> Result<Option<String>, ClientError> {
        match self.reader.read_text().await {
            Ok(text) => Ok(Some(text)),
            Err(CodecError::Closed) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Next text from the server, treating a closed connection as an error.
    pub async fn expect_text(&mut self) -> Result<String, ClientError> {
        self.recv().await?.ok_or(ClientError::Closed)
    }

    /// Send `quit` and close our write direction.
    pub async fn quit(mut self) -> Result<(), ClientError> {
        self.send(&Command::Quit).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
