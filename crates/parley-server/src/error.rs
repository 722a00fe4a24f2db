//! Server error types.

use thiserror::Error;

/// Errors that can occur in the server.
///
/// Only startup and the accept loop surface these. Failures inside one
/// session are logged and end that session alone.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (unusable bind address or upload directory).
    ///
    /// Fatal: fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
