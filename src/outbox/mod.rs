//! Transactional outbox.
//!
//! The outbox pattern has two distinct phases:
//! 1. **Store phase** - producers hand envelopes to [`OutboxMessageSender`],
//!    which serializes them into [`OutboxItem`] rows and appends them to the
//!    durable [`OutboxQueue`] before returning.
//! 2. **Dispatch phase** - the recurring worker (see `outbox_worker`) calls
//!    [`OutboxStore::dispatch_outbox_items`], which claims a batch under a
//!    lease, decodes it through the event registry and sends it to the bus.
//!
//! A batch is acknowledged only after the bus accepted it. Any failure
//! releases the lease, and a crash between dequeue and send is covered by
//! lease expiry, so delivery is at-least-once.
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(OutboxStore::new(queue, bus, registry).with_trigger(trigger));
//! let sender = OutboxMessageSender::new(store.clone());
//! sender.send(vec![MessageEnvelope::for_subject(event)], &cancel).await?;
//! ```

mod error;
#[cfg(feature = "in-memory")]
mod in_memory;
mod item;
mod queue;
mod sender;
mod store;

pub use error::{OutboxError, QueueError};
#[cfg(feature = "in-memory")]
pub use in_memory::InMemoryOutboxQueue;
pub use item::{OutboxItem, OutboxItemMetadata};
pub use queue::{Lease, OutboxBatch, OutboxQueue};
pub use sender::OutboxMessageSender;
pub use store::OutboxStore;
