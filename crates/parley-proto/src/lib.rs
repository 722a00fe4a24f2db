//! Parley wire protocol.
//!
//! One persistent, ordered byte stream per connection carries:
//!
//! - text frames (`u16` big-endian length + UTF-8), used for the opening
//!   display name, every command, every reply and every notice
//! - raw runs of a declared length, used only for file uploads
//!
//! # Components
//!
//! - [`codec`]: [`FrameDecoder`] state machine plus async [`FrameReader`] /
//!   [`FrameWriter`]
//! - [`command`]: parsing and rendering of client commands
//! - [`reply`]: rendering of server replies and notices

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod command;
pub mod reply;

pub use codec::{
    CodecError, Decoded, DecoderState, FrameDecoder, FrameReader, FrameWriter, MAX_RAW_LEN,
    MAX_TEXT_LEN, encode_length, encode_text,
};
pub use command::{Command, CommandError, CommandKind};
pub use reply::{Reply, file_notice};

/// Well-known service port.
pub const DEFAULT_PORT: u16 = 7777;
