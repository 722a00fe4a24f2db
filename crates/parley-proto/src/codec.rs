//! Frame codec.
//!
//! A connection carries two payload shapes on one ordered byte stream:
//!
//! ```text
//! text frame:   [len: u16 BE][len bytes of UTF-8]
//! length field: [n: u64 BE]            (top bit clear)
//! raw run:      [n bytes, no framing]  (always follows a length field)
//! ```
//!
//! [`FrameDecoder`] is a Sans-IO state machine over a [`BytesMut`] buffer. It
//! never peeks: the caller tells it when a length field is due, and after a
//! length field it hands out exactly `n` raw bytes before it will interpret
//! anything as a text frame again. Partial input is left in the buffer until
//! more bytes arrive, so transport chunking is invisible to the caller.
//!
//! [`FrameReader`] and [`FrameWriter`] bind the codec to async streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the text frame length prefix.
pub const TEXT_PREFIX_SIZE: usize = 2;

/// Size of the length field that announces a raw run.
pub const LENGTH_FIELD_SIZE: usize = 8;

/// Largest text payload a frame can carry.
pub const MAX_TEXT_LEN: usize = u16::MAX as usize;

/// Largest length a length field may declare.
///
/// The field is a signed 64-bit integer on the wire; negative values are
/// invalid.
pub const MAX_RAW_LEN: u64 = i64::MAX as u64;

/// Bytes reserved in the read buffer before each socket read.
const READ_CHUNK: usize = 8 * 1024;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer closed the stream cleanly between frames.
    #[error("connection closed")]
    Closed,

    /// The stream ended inside a frame, length field, or raw run.
    #[error("stream ended inside {0}")]
    UnexpectedEof(&'static str),

    /// A text frame carried bytes that are not UTF-8.
    #[error("text frame is not valid UTF-8")]
    InvalidUtf8,

    /// Text is too long to fit a single frame.
    #[error("text of {len} bytes exceeds frame limit of {max}")]
    TextTooLong {
        /// Length of the rejected text in bytes
        len: usize,
        /// Frame limit
        max: usize,
    },

    /// A length field declared a value outside `0..=MAX_RAW_LEN`.
    #[error("declared length {0} is out of range")]
    LengthOutOfRange(u64),

    /// The caller asked for a shape the decoder is not positioned at.
    #[error("cannot read {expected} while decoder is {state:?}")]
    OutOfSequence {
        /// What the caller asked for
        expected: &'static str,
        /// Where the decoder actually is
        state: DecoderState,
    },

    /// Underlying stream failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this error means the peer went away rather than sent garbage.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Closed | Self::UnexpectedEof(_))
    }
}

/// Position of the decoder within the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Next bytes are a text frame
    AwaitingFrame,
    /// Next 8 bytes are a length field
    AwaitingLength,
    /// Next `remaining` bytes belong to a raw run
    AwaitingRawRun {
        /// Bytes of the run not yet handed out
        remaining: u64,
    },
}

/// One unit produced by [`FrameDecoder::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete text frame
    Text(String),
    /// A length field; the decoder is now inside the announced raw run
    Length(u64),
    /// Some bytes of the current raw run, in stream order
    Raw(Bytes),
    /// The current raw run has been fully handed out
    RawEnd,
}

/// Sans-IO decoder for the connection byte stream.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder positioned at a text frame.
    pub fn new() -> Self {
        Self { state: DecoderState::AwaitingFrame }
    }

    /// Current position.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Announce that the next bytes are a length field.
    ///
    /// Only valid between frames.
    pub fn expect_length(&mut self) -> Result<(), CodecError> {
        if self.state != DecoderState::AwaitingFrame {
            return Err(CodecError::OutOfSequence { expected: "length field", state: self.state });
        }
        self.state = DecoderState::AwaitingLength;
        Ok(())
    }

    /// Decode the next unit from `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete unit; the
    /// partial bytes stay in `src`. Raw runs are handed out as soon as any of
    /// their bytes are available.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        match self.state {
            DecoderState::AwaitingFrame => {
                if src.len() < TEXT_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([src[0], src[1]]) as usize;
                if src.len() < TEXT_PREFIX_SIZE + len {
                    src.reserve(TEXT_PREFIX_SIZE + len - src.len());
                    return Ok(None);
                }
                src.advance(TEXT_PREFIX_SIZE);
                let body = src.split_to(len);
                let text = String::from_utf8(body.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Some(Decoded::Text(text)))
            },

            DecoderState::AwaitingLength => {
                if src.len() < LENGTH_FIELD_SIZE {
                    return Ok(None);
                }
                let declared = src.get_u64();
                if declared > MAX_RAW_LEN {
                    return Err(CodecError::LengthOutOfRange(declared));
                }
                self.state = DecoderState::AwaitingRawRun { remaining: declared };
                Ok(Some(Decoded::Length(declared)))
            },

            DecoderState::AwaitingRawRun { remaining: 0 } => {
                self.state = DecoderState::AwaitingFrame;
                Ok(Some(Decoded::RawEnd))
            },

            DecoderState::AwaitingRawRun { remaining } => {
                if src.is_empty() {
                    return Ok(None);
                }
                let take = usize::try_from(remaining).map_or(src.len(), |r| r.min(src.len()));
                let chunk = src.split_to(take).freeze();
                self.state = DecoderState::AwaitingRawRun { remaining: remaining - take as u64 };
                Ok(Some(Decoded::Raw(chunk)))
            },
        }
    }

    /// Error to report when the stream ends with `src` still unconsumed.
    pub fn eof_error(&self, src: &BytesMut) -> CodecError {
        match self.state {
            DecoderState::AwaitingFrame if src.is_empty() => CodecError::Closed,
            DecoderState::AwaitingFrame => CodecError::UnexpectedEof("text frame"),
            DecoderState::AwaitingLength => CodecError::UnexpectedEof("length field"),
            DecoderState::AwaitingRawRun { .. } => CodecError::UnexpectedEof("raw payload"),
        }
    }
}

/// Encode `text` as one text frame.
pub fn encode_text(text: &str, dst: &mut impl BufMut) -> Result<(), CodecError> {
    let len = u16::try_from(text.len())
        .map_err(|_| CodecError::TextTooLong { len: text.len(), max: MAX_TEXT_LEN })?;
    dst.put_u16(len);
    dst.put_slice(text.as_bytes());
    Ok(())
}

/// Encode a length field announcing a raw run of `len` bytes.
pub fn encode_length(len: u64, dst: &mut impl BufMut) -> Result<(), CodecError> {
    if len > MAX_RAW_LEN {
        return Err(CodecError::LengthOutOfRange(len));
    }
    dst.put_u64(len);
    Ok(())
}

/// Reads frames and raw runs from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a stream positioned at a text frame.
    pub fn new(inner: R) -> Self {
        Self { inner, buf: BytesMut::with_capacity(READ_CHUNK), decoder: FrameDecoder::new() }
    }

    /// Current decoder position.
    pub fn state(&self) -> DecoderState {
        self.decoder.state()
    }

    /// Read one complete text frame.
    pub async fn read_text(&mut self) -> Result<String, CodecError> {
        self.ensure_state(DecoderState::AwaitingFrame, "text frame")?;
        match self.next().await? {
            Decoded::Text(text) => Ok(text),
            _ => Err(CodecError::OutOfSequence { expected: "text frame", state: self.state() }),
        }
    }

    /// Read a length field. The reader is then inside the announced raw run
    /// and must be drained with [`Self::read_raw_chunk`] before the next
    /// text frame.
    pub async fn read_length(&mut self) -> Result<u64, CodecError> {
        self.decoder.expect_length()?;
        match self.next().await? {
            Decoded::Length(len) => Ok(len),
            _ => Err(CodecError::OutOfSequence { expected: "length field", state: self.state() }),
        }
    }

    /// Next chunk of the current raw run, or `None` once it is exhausted.
    pub async fn read_raw_chunk(&mut self) -> Result<Option<Bytes>, CodecError> {
        if !matches!(self.state(), DecoderState::AwaitingRawRun { .. }) {
            return Err(CodecError::OutOfSequence { expected: "raw payload", state: self.state() });
        }
        match self.next().await? {
            Decoded::Raw(chunk) => Ok(Some(chunk)),
            Decoded::RawEnd => Ok(None),
            _ => Err(CodecError::OutOfSequence { expected: "raw payload", state: self.state() }),
        }
    }

    /// Discard the rest of the current raw run. Returns the bytes skipped.
    pub async fn skip_raw(&mut self) -> Result<u64, CodecError> {
        let mut skipped = 0u64;
        while let Some(chunk) = self.read_raw_chunk().await? {
            skipped += chunk.len() as u64;
        }
        Ok(skipped)
    }

    fn ensure_state(&self, want: DecoderState, expected: &'static str) -> Result<(), CodecError> {
        if self.state() == want {
            Ok(())
        } else {
            Err(CodecError::OutOfSequence { expected, state: self.state() })
        }
    }

    async fn next(&mut self) -> Result<Decoded, CodecError> {
        loop {
            if let Some(item) = self.decoder.decode(&mut self.buf)? {
                return Ok(item);
            }
            self.buf.reserve(READ_CHUNK);
            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(self.decoder.eof_error(&self.buf));
            }
        }
    }
}

/// Writes frames and raw runs to an async byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    scratch: BytesMut,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self { inner, scratch: BytesMut::new() }
    }

    /// Write one text frame. Does not flush.
    pub async fn write_text(&mut self, text: &str) -> Result<(), CodecError> {
        self.scratch.clear();
        encode_text(text, &mut self.scratch)?;
        self.inner.write_all(&self.scratch).await?;
        Ok(())
    }

    /// Write a length field. Does not flush.
    pub async fn write_length(&mut self, len: u64) -> Result<(), CodecError> {
        self.scratch.clear();
        encode_length(len, &mut self.scratch)?;
        self.inner.write_all(&self.scratch).await?;
        Ok(())
    }

    /// Write raw bytes with no framing. Does not flush.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    /// Flush buffered bytes to the peer.
    pub async fn flush(&mut self) -> Result<(), CodecError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
