//! In-memory outbox queue for testing and single-process scenarios.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::error::QueueError;
use super::item::OutboxItem;
use super::queue::{Lease, OutboxBatch, OutboxQueue};

struct Row {
    item: OutboxItem,
    attempts: u32,
    claim: Option<Lease>,
}

impl Row {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        match &self.claim {
            None => true,
            Some(lease) => lease.expires_at <= now,
        }
    }
}

#[derive(Default)]
struct QueueState {
    rows: Vec<Row>,
    next_lease: u64,
}

/// In-memory outbox queue.
///
/// Features:
/// - Thread-safe (clones share the same rows)
/// - FIFO order, all-or-nothing `enqueue`
/// - Leased dequeue: claimed rows are hidden until acknowledged, released,
///   or the lease expires, which gives at-least-once redelivery after a crash
///
/// ## Example
///
/// ```
/// use outbox_dispatch::outbox::{InMemoryOutboxQueue, OutboxItem, OutboxQueue};
/// use outbox_dispatch::{AccountCreatedEvent, MessageEnvelope};
///
/// let queue = InMemoryOutboxQueue::new();
/// let envelope = MessageEnvelope::for_subject(AccountCreatedEvent::new("123", chrono::Utc::now()));
/// queue.enqueue(vec![OutboxItem::from_envelope(&envelope).unwrap()]).unwrap();
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryOutboxQueue {
    state: Arc<Mutex<QueueState>>,
    batch_size: usize,
    lease_duration: Duration,
}

impl Default for InMemoryOutboxQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            batch_size: 100,
            lease_duration: Duration::from_secs(60),
        }
    }

    /// Set the maximum number of items claimed by one dequeue.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set how long dequeued items stay hidden before becoming visible again.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::LockPoisoned(operation))
    }

    fn snapshot(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total rows held, claimed or not.
    pub fn len(&self) -> usize {
        self.snapshot().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().rows.is_empty()
    }

    /// Rows a dequeue would currently see.
    pub fn visible_len(&self) -> usize {
        let now = Utc::now();
        self.snapshot()
            .rows
            .iter()
            .filter(|row| row.is_visible(now))
            .count()
    }

    /// Copies of every row in queue order.
    pub fn items(&self) -> Vec<OutboxItem> {
        self.snapshot()
            .rows
            .iter()
            .map(|row| row.item.clone())
            .collect()
    }

    /// Number of times each row has been dequeued, in queue order.
    pub fn attempts(&self) -> Vec<u32> {
        self.snapshot().rows.iter().map(|row| row.attempts).collect()
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lease_duration)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl OutboxQueue for InMemoryOutboxQueue {
    fn enqueue(&self, items: Vec<OutboxItem>) -> Result<(), QueueError> {
        let mut state = self.lock("enqueue")?;
        state.rows.extend(items.into_iter().map(|item| Row {
            item,
            attempts: 0,
            claim: None,
        }));
        Ok(())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<OutboxBatch, QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let now = Utc::now();
        let mut state = self.lock("dequeue")?;
        state.next_lease += 1;
        let lease = Lease {
            id: state.next_lease,
            expires_at: self.lease_until(now),
        };

        let mut items = Vec::new();
        for row in state.rows.iter_mut() {
            if items.len() >= self.batch_size {
                break;
            }
            if row.is_visible(now) {
                row.claim = Some(lease);
                row.attempts += 1;
                items.push(row.item.clone());
            }
        }

        Ok(OutboxBatch { lease, items })
    }

    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.lock("acknowledge")?;
        let before = state.rows.len();
        state
            .rows
            .retain(|row| row.claim.map_or(true, |claim| claim.id != lease.id));

        if before == state.rows.len() {
            return Err(QueueError::UnknownLease(lease.id));
        }
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.lock("release")?;
        let mut released = 0;
        for row in state.rows.iter_mut() {
            if row.claim.map_or(false, |claim| claim.id == lease.id) {
                row.claim = None;
                released += 1;
            }
        }

        if released == 0 {
            return Err(QueueError::UnknownLease(lease.id));
        }
        Ok(())
    }
}
