use crate::config::Config;
use crate::error::ProxyError;
use crate::session::ConnectionSession;
use crate::transform::ImageTransformer;
use crate::upstream::UpstreamClient;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

/// Accept loop: one task per client connection, bounded by a semaphore
/// permit held for the session's lifetime.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    upstream: Arc<UpstreamClient>,
    transformer: Arc<dyn ImageTransformer>,
    spool_dir: PathBuf,
    connection_limit: Arc<Semaphore>,
}

impl RelayServer {
    /// Bind the listen address. This is the one failure the server
    /// surfaces to the caller instead of logging and carrying on.
    pub async fn bind(
        config: &Config,
        transformer: Arc<dyn ImageTransformer>,
    ) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "Relay bound to {} (max {} concurrent connections)",
            local_addr, config.max_connections
        );

        Ok(Self {
            listener,
            local_addr,
            upstream: Arc::new(UpstreamClient::new(config.connect_timeout())),
            transformer,
            spool_dir: config.spool_dir(),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// The address actually bound, which differs from the configured one
    /// when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the surrounding task is dropped.
    pub async fn run(self) -> Result<(), ProxyError> {
        loop {
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ProxyError::Config(format!("connection limiter closed: {}", e)))?;

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let session = ConnectionSession::new(
                stream,
                peer,
                self.upstream.clone(),
                self.transformer.clone(),
                self.spool_dir.clone(),
            );
            tokio::spawn(async move {
                session.run().await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::UnconfiguredTransformer;

    #[tokio::test]
    async fn test_bind_to_ephemeral_port() {
        let mut config = Config::default();
        config.listen_addr = "127.0.0.1:0".parse().unwrap();

        let server = RelayServer::bind(&config, Arc::new(UnconfiguredTransformer))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let mut config = Config::default();
        config.listen_addr = "127.0.0.1:0".parse().unwrap();
        let first = RelayServer::bind(&config, Arc::new(UnconfiguredTransformer))
            .await
            .unwrap();

        config.listen_addr = first.local_addr();
        let second = RelayServer::bind(&config, Arc::new(UnconfiguredTransformer)).await;
        assert!(second.is_err());
    }
}
