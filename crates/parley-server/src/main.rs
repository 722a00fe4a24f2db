//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port, storing uploads in the working directory
//! parley-server
//!
//! # Custom address and upload directory, uploads capped at 10 MiB
//! parley-server --bind 127.0.0.1:9000 --upload-dir /var/lib/parley --max-upload-bytes 10485760
//! ```

use std::path::PathBuf;

use clap::Parser;
use parley_server::{DEFAULT_UPLOAD_PREFIX, Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley group relay server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Multi-party group messaging and file relay server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7777")]
    bind: String,

    /// Directory uploaded files are written to
    #[arg(short, long, default_value = ".")]
    upload_dir: PathBuf,

    /// Prefix for stored upload file names
    #[arg(long, default_value = DEFAULT_UPLOAD_PREFIX)]
    upload_prefix: String,

    /// Largest file a client may upload, in bytes
    #[arg(long)]
    max_upload_bytes: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Parley server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerConfig {
        bind_address: args.bind,
        upload_dir: args.upload_dir,
        upload_prefix: args.upload_prefix,
        max_upload_bytes: args.max_upload_bytes,
    };

    let server = Server::bind(config).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    server.run_until(shutdown).await?;

    Ok(())
}
