// Connection acceptor and server lifecycle

use crate::vault::cipher::MessageCipher;
use crate::vault::config::ServerConfig;
use crate::vault::pool::WorkerPool;
use crate::vault::queue::{ConnectionQueue, QueueFull};
use crate::vault::store::MessageStore;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

pub const BUSY_MESSAGE: &str = "ERROR: server busy, try again later\n";

/// A running message server: acceptor, queue, worker pool and store
pub struct MessageServer {
    config: ServerConfig,
    listener: TcpListener,
    store: Arc<MessageStore>,
    queue: Arc<ConnectionQueue<TcpStream>>,
}

impl MessageServer {
    /// Bind the listening socket
    pub async fn bind(config: ServerConfig, cipher: MessageCipher) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

        Ok(Self::from_listener(config, cipher, listener))
    }

    /// Serve on an already bound listener
    pub fn from_listener(config: ServerConfig, cipher: MessageCipher, listener: TcpListener) -> Self {
        let store = Arc::new(MessageStore::new(Arc::new(cipher), config.preview_len));
        let queue = Arc::new(ConnectionQueue::new(config.workers));

        Self {
            config,
            listener,
            store,
            queue,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    pub fn store(&self) -> Arc<MessageStore> {
        self.store.clone()
    }

    /// Accept connections until `shutdown` is cancelled, then drain the pool.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let pool = WorkerPool::spawn(self.queue.clone(), self.store.clone(), &self.config);

        tracing::info!(
            "Listening on {} ({} workers, max message {} bytes, delimiter '{}')",
            self.local_addr()?,
            pool.size(),
            self.config.max_message_len,
            self.config.delimiter_char()
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.dispatch(stream, addr).await,
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(self.listener);
        stop_workers(pool, &self.queue).await;

        tracing::info!(
            "Server stopped, discarding {} stored messages",
            self.store.len().await
        );
        Ok(())
    }

    async fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        match self.queue.push(stream) {
            Ok(()) => tracing::debug!("Queued connection from {}", addr),
            Err(QueueFull {
                connection: mut stream,
                capacity,
            }) => {
                tracing::warn!(
                    "Rejecting connection from {}: all {} slots busy",
                    addr,
                    capacity
                );
                reject(&mut stream).await;
            }
        }
    }
}

/// Stop the pool, then close every connection no worker got to.
///
/// Returns how many queued connections were closed unserved.
async fn stop_workers<C>(pool: WorkerPool<C>, queue: &ConnectionQueue<C>) -> usize
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pool.shutdown().await;

    let queued = queue.drain();
    let closed = queued.len();
    for mut connection in queued {
        let _ = connection.shutdown().await;
    }
    if closed > 0 {
        tracing::info!("Closed {} queued connections that were never served", closed);
    }
    closed
}

/// Tell an over-capacity client to go away and close its connection
async fn reject(stream: &mut TcpStream) {
    if let Err(e) = stream.write_all(BUSY_MESSAGE.as_bytes()).await {
        tracing::debug!("Failed to notify rejected client: {}", e);
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::cipher::{IV_LEN, KEY_LEN};
    use crate::vault::session::PROMPT;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    async fn read_until(client: &mut DuplexStream, marker: &str) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        while !out.ends_with(marker.as_bytes()) {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "closed early, got: {}", String::from_utf8_lossy(&out));
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_bind_and_stop() {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        config.workers = 2;
        let cipher = MessageCipher::new([0u8; KEY_LEN], [0u8; IV_LEN], 16);

        let server = MessageServer::bind(config, cipher).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));
        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        config.workers = 0;
        let cipher = MessageCipher::new([0u8; KEY_LEN], [0u8; IV_LEN], 16);
        assert!(MessageServer::bind(config, cipher).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_queued_connections() {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        config.workers = 1;
        let cipher = MessageCipher::new([0u8; KEY_LEN], [0u8; IV_LEN], 16);
        let store = Arc::new(MessageStore::new(Arc::new(cipher), config.preview_len));
        // One more slot than workers, so a connection can wait its turn
        let queue = Arc::new(ConnectionQueue::new(2));
        let pool = WorkerPool::spawn(queue.clone(), store, &config);

        let (mut active, server_side) = duplex(4096);
        queue.push(server_side).unwrap();
        read_until(&mut active, PROMPT).await;

        let (mut waiting, server_side) = duplex(4096);
        queue.push(server_side).unwrap();
        assert_eq!(queue.pending(), 1);

        let stopping = {
            let queue = queue.clone();
            tokio::spawn(async move { stop_workers(pool, &queue).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());

        active.write_all(b"5\n").await.unwrap();
        read_until(&mut active, "Goodbye.\n").await;

        let closed = tokio::time::timeout(Duration::from_secs(5), stopping)
            .await
            .expect("workers should stop once the session ends")
            .unwrap();
        assert_eq!(closed, 1);

        // The waiting client was never served and now sees EOF
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), waiting.read_to_end(&mut rest))
            .await
            .expect("queued connection was left open")
            .unwrap();
        assert!(rest.is_empty(), "got: {}", String::from_utf8_lossy(&rest));
        assert_eq!(queue.occupied(), 0);
    }
}
