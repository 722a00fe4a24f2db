//! Server configuration.

use std::path::PathBuf;

use parley_proto::DEFAULT_PORT;

/// File-name prefix for stored uploads.
pub const DEFAULT_UPLOAD_PREFIX: &str = "received_";

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:7777")
    pub bind_address: String,
    /// Directory relayed payloads are written to
    pub upload_dir: PathBuf,
    /// Prefix prepended to each stored file name
    pub upload_prefix: String,
    /// Largest payload a `SendFile` may declare. `None` means unbounded.
    pub max_upload_bytes: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            upload_dir: PathBuf::from("."),
            upload_prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
            max_upload_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_values() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:7777");
        assert_eq!(config.upload_dir, PathBuf::from("."));
        assert_eq!(config.upload_prefix, "received_");
        assert_eq!(config.max_upload_bytes, None);
    }
}
