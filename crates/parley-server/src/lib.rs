//! Parley group relay server.
//!
//! Clients connect over TCP, name themselves, and then create, join, leave
//! and remove named groups, post messages to them, and upload files whose
//! arrival is announced to the group.
//!
//! # Architecture
//!
//! The membership relation lives in a [`GroupRegistry`] guarded by a single
//! lock inside the [`Relay`]. Every change to it takes a snapshot of the
//! affected members under that lock; delivery happens after the lock is
//! released, by enqueueing onto each member's [`Outbound`] queue. Each queue is
//! drained by its own writer task, so a slow client only ever delays itself.
//!
//! # Components
//!
//! - [`Server`]: TCP acceptor, one task per connection
//! - [`Relay`]: shared state; serves a connection over any async stream
//! - [`GroupRegistry`]: bidirectional session/group membership
//! - [`notify`] / [`run_writer`]: broadcast and per-session writer
//! - [`UploadStore`]: where relayed payloads are written ([`DiskStore`],
//!   [`MemoryStore`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broadcast;
mod config;
mod error;
pub mod registry;
mod relay;
mod server;
mod session;
pub mod store;

pub use broadcast::{DeliveryError, DeliveryReport, Outbound, notify, run_writer};
pub use config::{DEFAULT_UPLOAD_PREFIX, ServerConfig};
pub use error::ServerError;
pub use registry::{GroupRegistry, Member, SessionId};
pub use relay::Relay;
pub use server::Server;
pub use session::CloseReason;
pub use store::{DiskStore, MemoryStore, UploadError, UploadStore};
