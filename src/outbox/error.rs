use thiserror::Error;

use crate::event::EventError;

/// Errors from the durable queue behind the outbox.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("outbox queue unavailable: {0}")]
    Unavailable(String),

    #[error("outbox queue lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("lease {0} is unknown or already settled")]
    UnknownLease(u64),

    #[error("outbox queue operation cancelled")]
    Cancelled,
}

/// Errors from storing or dispatching outbox items.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("failed to hand outbox items to the bus: {0}")]
    Send(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("outbox dispatch cancelled")]
    Cancelled,
}
