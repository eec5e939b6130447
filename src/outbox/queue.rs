use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::error::QueueError;
use super::item::OutboxItem;

/// A time-bounded claim on dequeued items.
///
/// Leased items are invisible to other dequeues until the lease is
/// acknowledged, released, or expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub id: u64,
    pub expires_at: DateTime<Utc>,
}

/// Items claimed by one dequeue call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxBatch {
    pub lease: Lease,
    pub items: Vec<OutboxItem>,
}

impl OutboxBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Durable FIFO queue backing the outbox.
///
/// `enqueue` is synchronous so it can join the caller's unit of work and must
/// append all items or none. `dequeue` claims the next batch (size is the
/// queue's policy) under a lease; a claimed item must never be handed to a
/// second concurrent dequeue.
#[async_trait]
pub trait OutboxQueue: Send + Sync {
    fn enqueue(&self, items: Vec<OutboxItem>) -> Result<(), QueueError>;

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<OutboxBatch, QueueError>;

    /// Remove the leased items permanently.
    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Return the leased items to the queue for another attempt.
    async fn release(&self, lease: &Lease) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q: OutboxQueue + ?Sized> OutboxQueue for std::sync::Arc<Q> {
    fn enqueue(&self, items: Vec<OutboxItem>) -> Result<(), QueueError> {
        (**self).enqueue(items)
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<OutboxBatch, QueueError> {
        (**self).dequeue(cancel).await
    }

    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError> {
        (**self).acknowledge(lease).await
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        (**self).release(lease).await
    }
}
