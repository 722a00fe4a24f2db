//! TCP connection acceptor.
//!
//! The accept loop does nothing but accept: each connection gets its own task,
//! which reads the opening name frame and then runs the session. A client
//! that connects and never sends its name therefore never delays anyone else.

use std::{future::Future, net::SocketAddr};

use tokio::net::{TcpListener, TcpStream};

use crate::{
    config::ServerConfig,
    error::ServerError,
    relay::Relay,
    store::{DiskStore, UploadStore},
};

/// Production parley server.
///
/// Owns the listening socket and the [`Relay`] every accepted connection is
/// served through.
pub struct Server<U = DiskStore> {
    listener: TcpListener,
    relay: Relay<U>,
}

impl Server<DiskStore> {
    /// Bind a server that writes uploads to `config.upload_dir`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let metadata = tokio::fs::metadata(&config.upload_dir).await.map_err(|e| {
            ServerError::Config(format!("upload dir {}: {e}", config.upload_dir.display()))
        })?;
        if !metadata.is_dir() {
            return Err(ServerError::Config(format!(
                "upload dir {} is not a directory",
                config.upload_dir.display()
            )));
        }

        let store = DiskStore::new(&config.upload_dir, config.upload_prefix.clone());
        Self::bind_with_store(config, store).await
    }
}

impl<U: UploadStore> Server<U> {
    /// Bind a server storing uploads in `store`. `upload_dir` and
    /// `upload_prefix` from the config are ignored.
    pub async fn bind_with_store(config: ServerConfig, store: U) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Config(format!("cannot bind {}: {e}", config.bind_address))
        })?;

        let relay = Relay::new(store, config.max_upload_bytes);
        Ok(Self { listener, relay })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared relay state, for inspection while the server runs.
    pub fn relay(&self) -> Relay<U> {
        self.relay.clone()
    }

    /// Run the server, accepting connections until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Stopping only closes the listener; sessions already running continue
    /// until their clients leave.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Server stopped accepting connections");
                    return Ok(());
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {}", e);
        }
        tracing::debug!(%peer, "connection accepted");

        let relay = self.relay.clone();
        let (reader, writer) = stream.into_split();
        tokio::spawn(async move {
            if let Err(e) = relay.serve_split(reader, writer).await {
                tracing::debug!(%peer, "connection ended before name frame: {}", e);
            }
        });
    }
}
