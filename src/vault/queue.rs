// Bounded hand-off queue between the acceptor and the worker pool
//
// Entries are popped in LIFO order. Workers are interchangeable, so no
// fairness between queued connections is promised.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Returned by [`ConnectionQueue::push`] when every slot is taken.
///
/// Carries the rejected connection back so the caller can close it.
#[derive(Error)]
#[error("connection queue is full ({capacity} slots)")]
pub struct QueueFull<C> {
    pub connection: C,
    pub capacity: usize,
}

impl<C> std::fmt::Debug for QueueFull<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFull")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// A queued connection plus the capacity slot it occupies.
///
/// The slot is returned to the queue when the ticket is dropped, which the
/// worker does only after the session has finished.
pub struct Ticket<C> {
    connection: C,
    slot: OwnedSemaphorePermit,
}

impl<C> Ticket<C> {
    pub fn into_parts(self) -> (C, OwnedSemaphorePermit) {
        (self.connection, self.slot)
    }
}

/// What a worker receives from [`ConnectionQueue::pop`]
pub enum QueueEntry<C> {
    Connection(Ticket<C>),
    Shutdown,
}

pub struct ConnectionQueue<C> {
    entries: Mutex<Vec<QueueEntry<C>>>,
    available: Semaphore,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl<C> ConnectionQueue<C> {
    /// Create a queue with `capacity` slots (normally the worker count)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            available: Semaphore::new(0),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Slots held by queued connections or sessions still being served
    pub fn occupied(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Connections waiting for a worker
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| matches!(e, QueueEntry::Connection(_)))
            .count()
    }

    /// Hand a connection to the workers. Never blocks.
    pub fn push(&self, connection: C) -> Result<(), QueueFull<C>> {
        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(_) => {
                return Err(QueueFull {
                    connection,
                    capacity: self.capacity,
                })
            }
        };

        self.entries.lock().push(QueueEntry::Connection(Ticket {
            connection,
            slot,
        }));
        self.available.add_permits(1);

        Ok(())
    }

    /// Wait for an entry.
    ///
    /// Returns `None` if woken with nothing to take; callers should simply
    /// wait again.
    pub async fn pop(&self) -> Option<QueueEntry<C>> {
        match self.available.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Some(QueueEntry::Shutdown),
        }

        self.entries.lock().pop()
    }

    /// Enqueue one shutdown sentinel per worker. Not subject to capacity.
    pub fn broadcast_shutdown(&self, workers: usize) {
        {
            let mut entries = self.entries.lock();
            for _ in 0..workers {
                entries.push(QueueEntry::Shutdown);
            }
        }
        self.available.add_permits(workers);
    }

    /// Remove every connection still waiting for a worker.
    ///
    /// Availability is not adjusted, so a later `pop` may come back empty.
    pub fn drain(&self) -> Vec<C> {
        let mut entries = self.entries.lock();
        let mut drained = Vec::new();
        for entry in entries.drain(..) {
            if let QueueEntry::Connection(ticket) = entry {
                drained.push(ticket.into_parts().0);
            }
        }
        drained
    }
}
