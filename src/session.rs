use crate::error::ProxyError;
use crate::relay::{DeliveryMode, relay_response};
use crate::request::parse_client_request;
use crate::spool::InterceptSpool;
use crate::transform::ImageTransformer;
use crate::upstream::UpstreamClient;
use log::{debug, error};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Serves one accepted connection from first byte to cleanup.
///
/// A session never lets an error escape: whatever happens, the
/// connection is closed and any temporary stores the intercept path
/// created are deleted before the session ends.
pub struct ConnectionSession {
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    upstream: Arc<UpstreamClient>,
    transformer: Arc<dyn ImageTransformer>,
    spool: InterceptSpool,
}

impl ConnectionSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        upstream: Arc<UpstreamClient>,
        transformer: Arc<dyn ImageTransformer>,
        spool_dir: PathBuf,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer,
            reader: BufReader::new(read_half),
            writer: write_half,
            upstream,
            transformer,
            spool: InterceptSpool::new(spool_dir),
        }
    }

    /// Run the session to completion. Errors end it early; they are
    /// logged here and never propagated to the caller.
    pub async fn run(mut self) {
        debug!("Session started for {}", self.peer);
        match self.serve().await {
            Ok(mode) => debug!("Session for {} delivered a {:?} response", self.peer, mode),
            Err(e) if e.is_client_fault() => {
                debug!("Session for {} rejected its request: {}", self.peer, e)
            }
            Err(e) => error!("Session for {} failed: {}", self.peer, e),
        }
        self.finish().await;
    }

    async fn serve(&mut self) -> Result<DeliveryMode, ProxyError> {
        let request = parse_client_request(&mut self.reader).await?;
        debug!("{} requested {}", self.peer, request.target_url);

        let response = self.upstream.fetch(&request).await?;
        relay_response(
            response,
            &mut self.writer,
            self.transformer.as_ref(),
            &mut self.spool,
        )
        .await
    }

    /// Close the connection, then delete the session's temporary stores.
    async fn finish(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error closing client sink for {}: {}", self.peer, e);
        }
        drop(self.writer);
        drop(self.reader);
        self.spool.cleanup().await;
        debug!("Session finished for {}", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::UnconfiguredTransformer;
    use tokio::net::TcpListener;

    /// Sessions execute as spawned tasks on a multi-threaded runtime, so
    /// the whole run future has to be movable to another worker thread.
    #[tokio::test]
    async fn test_session_runs_as_a_spawned_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        let session = ConnectionSession::new(
            stream,
            peer,
            Arc::new(UpstreamClient::new(None)),
            Arc::new(UnconfiguredTransformer),
            std::env::temp_dir(),
        );

        // Client hangs up without sending a request; the spawned session
        // must still run to completion and be joinable.
        drop(client);
        tokio::spawn(session.run()).await.unwrap();
    }
}
