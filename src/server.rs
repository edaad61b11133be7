//! Server assembly and accept loop
//!
//! Binds the listener and runs one message pump per accepted connection.
//! The query processor, authenticator and catalog are injected; this crate
//! owns only the protocol layer between them and the socket.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::catalog::{CatalogReader, MetadataFacade};
use crate::config::ServerConfig;
use crate::processor::{Authenticator, QueryProcessor};
use crate::pump;
use crate::session::ClientManager;

/// Collaborators and state shared by every connection.
pub struct Shared {
    pub config: ServerConfig,
    pub clients: ClientManager,
    pub processor: Arc<dyn QueryProcessor>,
    pub authenticator: Arc<dyn Authenticator>,
    pub metadata: MetadataFacade,
}

pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        processor: Arc<dyn QueryProcessor>,
        authenticator: Arc<dyn Authenticator>,
        catalog: Arc<dyn CatalogReader>,
    ) -> Self {
        Server {
            shared: Arc::new(Shared {
                config,
                clients: ClientManager::new(),
                processor,
                authenticator,
                metadata: MetadataFacade::new(catalog),
            }),
        }
    }

    /// Connection registry, exposed for embedders and tests.
    pub fn clients(&self) -> &ClientManager {
        &self.shared.clients
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "listening");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "client connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "set_nodelay failed");
                    }
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(pump::run_connection(shared, stream));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Drive one already-established duplex stream through the protocol.
    /// Used by tests and by embedders with their own listeners (e.g. a
    /// Unix domain socket).
    pub async fn serve_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        pump::run_connection(Arc::clone(&self.shared), stream).await
    }
}
