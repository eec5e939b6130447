#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outbox_dispatch::bus::MessageSender;
use outbox_dispatch::outbox::{Lease, OutboxBatch, OutboxItem, OutboxQueue, QueueError};
use outbox_dispatch::MessageEnvelope;
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Counts `ERROR` events emitted while installed.
#[derive(Clone, Default)]
pub struct ErrorLog {
    count: Arc<AtomicUsize>,
}

impl ErrorLog {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Install an error-counting subscriber for the current thread.
pub fn capture_errors() -> (ErrorLog, DefaultGuard) {
    let log = ErrorLog::default();
    let subscriber = tracing_subscriber::registry().with(log.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (log, guard)
}

#[derive(Debug, thiserror::Error)]
#[error("bus offline")]
pub struct Offline;

/// Records every batch it is asked to send; optionally fails instead.
#[derive(Default)]
pub struct RecordingSender {
    batches: Mutex<Vec<Vec<MessageEnvelope>>>,
    failing: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<MessageEnvelope>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    type Error = Offline;

    async fn send(
        &self,
        envelopes: Vec<MessageEnvelope>,
        _cancel: &CancellationToken,
    ) -> Result<(), Offline> {
        if self.failing {
            return Err(Offline);
        }
        self.batches.lock().unwrap().push(envelopes);
        Ok(())
    }
}

/// A queue whose backing store is unreachable.
pub struct UnreachableQueue;

#[async_trait]
impl OutboxQueue for UnreachableQueue {
    fn enqueue(&self, _items: Vec<OutboxItem>) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn dequeue(&self, _cancel: &CancellationToken) -> Result<OutboxBatch, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError> {
        Err(QueueError::UnknownLease(lease.id))
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        Err(QueueError::UnknownLease(lease.id))
    }
}
