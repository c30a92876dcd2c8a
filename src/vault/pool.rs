// Fixed pool of long-lived session workers

use crate::vault::config::ServerConfig;
use crate::vault::queue::{ConnectionQueue, QueueEntry};
use crate::vault::session::{Session, SessionError};
use crate::vault::store::MessageStore;
use futures::future::join_all;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// N workers pulling connections from a shared queue
pub struct WorkerPool<C> {
    queue: Arc<ConnectionQueue<C>>,
    workers: Vec<JoinHandle<()>>,
}

impl<C> WorkerPool<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn `config.workers` workers serving connections from `queue`
    pub fn spawn(
        queue: Arc<ConnectionQueue<C>>,
        store: Arc<MessageStore>,
        config: &ServerConfig,
    ) -> Self {
        let config = Arc::new(config.clone());

        let workers = (0..config.workers)
            .map(|worker_id| {
                let queue = queue.clone();
                let store = store.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, queue, store, config).await;
                })
            })
            .collect();

        tracing::info!("Started {} workers", config.workers);

        Self { queue, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop every worker.
    ///
    /// Idle workers exit as soon as they see their sentinel. A worker in the
    /// middle of a session finishes it first.
    pub async fn shutdown(self) {
        let count = self.workers.len();
        tracing::info!("Stopping {} workers", count);
        self.queue.broadcast_shutdown(count);

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        tracing::info!("All workers stopped");
    }
}

async fn run_worker<C>(
    worker_id: usize,
    queue: Arc<ConnectionQueue<C>>,
    store: Arc<MessageStore>,
    config: Arc<ServerConfig>,
) where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tracing::debug!("Worker {} started", worker_id);

    loop {
        let ticket = match queue.pop().await {
            Some(QueueEntry::Connection(ticket)) => ticket,
            Some(QueueEntry::Shutdown) => break,
            None => {
                tracing::warn!("Worker {} woke to an empty queue, waiting again", worker_id);
                continue;
            }
        };

        let (connection, slot) = ticket.into_parts();
        tracing::debug!("Worker {} serving a session", worker_id);

        let mut session = Session::new(connection, store.clone(), &config);
        match session.run().await {
            Ok(()) => tracing::debug!("Worker {}: client exited", worker_id),
            Err(SessionError::Disconnected) => {
                tracing::debug!("Worker {}: client disconnected", worker_id)
            }
            Err(e) => tracing::warn!("Worker {}: session ended: {}", worker_id, e),
        }

        let mut connection = session.into_inner();
        if let Err(e) = connection.shutdown().await {
            tracing::debug!("Worker {}: error closing connection: {}", worker_id, e);
        }
        drop(connection);
        drop(slot);
    }

    tracing::debug!("Worker {} exiting", worker_id);
}
