use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::OutboxError;
use super::item::OutboxItem;
use super::queue::{Lease, OutboxQueue};
use crate::bus::MessageSender;
use crate::envelope::MessageEnvelope;
use crate::event::EventRegistry;
use crate::outbox_worker::DispatchTrigger;

/// Owns the outbox queue: persists envelopes and later dispatches them to the bus.
///
/// The two phases are separate on purpose:
/// 1. **Store phase** ([`store`](Self::store)) - serialize and durably enqueue
/// 2. **Dispatch phase** ([`dispatch_outbox_items`](Self::dispatch_outbox_items)) -
///    claim a batch, decode it and hand it to the sender
pub struct OutboxStore<Q, S> {
    queue: Q,
    sender: S,
    registry: Arc<EventRegistry>,
    trigger: Option<DispatchTrigger>,
}

impl<Q, S> OutboxStore<Q, S> {
    pub fn new(queue: Q, sender: S, registry: Arc<EventRegistry>) -> Self {
        Self {
            queue,
            sender,
            registry,
            trigger: None,
        }
    }

    /// Wake the dispatch worker whenever new items are stored.
    pub fn with_trigger(mut self, trigger: DispatchTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }
}

impl<Q: OutboxQueue, S: MessageSender> OutboxStore<Q, S> {
    /// Serialize every envelope and enqueue them as one append.
    ///
    /// Nothing is enqueued if any envelope fails to serialize.
    pub async fn store(&self, envelopes: &[MessageEnvelope]) -> Result<(), OutboxError> {
        if envelopes.is_empty() {
            return Ok(());
        }

        let items = envelopes
            .iter()
            .map(OutboxItem::from_envelope)
            .collect::<Result<Vec<_>, _>>()?;
        let count = items.len();

        self.queue.enqueue(items)?;
        debug!(count, "stored outbox items");

        if let Some(trigger) = &self.trigger {
            trigger.notify();
        }
        Ok(())
    }

    /// Claim the next batch, decode it and send it to the bus.
    ///
    /// Returns the number of envelopes sent. On failure the claimed batch is
    /// released for the next attempt, the error is logged once and returned.
    pub async fn dispatch_outbox_items(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, OutboxError> {
        match self.dispatch(cancel).await {
            Ok(count) => Ok(count),
            Err(e) => {
                error!(error = %e, "failed to dispatch outbox items");
                Err(e)
            }
        }
    }

    async fn dispatch(&self, cancel: &CancellationToken) -> Result<usize, OutboxError> {
        let batch = self.queue.dequeue(cancel).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        match self.send_batch(&batch.items, cancel).await {
            Ok(count) => {
                self.queue.acknowledge(&batch.lease).await?;
                debug!(count, lease = batch.lease.id, "dispatched outbox items");
                Ok(count)
            }
            Err(e) => {
                self.release(&batch.lease).await;
                Err(e)
            }
        }
    }

    async fn send_batch(
        &self,
        items: &[OutboxItem],
        cancel: &CancellationToken,
    ) -> Result<usize, OutboxError> {
        let envelopes = items
            .iter()
            .map(|item| item.to_envelope(&self.registry))
            .collect::<Result<Vec<_>, _>>()?;
        let count = envelopes.len();

        if cancel.is_cancelled() {
            return Err(OutboxError::Cancelled);
        }

        self.sender
            .send(envelopes, cancel)
            .await
            .map_err(|e| OutboxError::Send(Box::new(e)))?;
        Ok(count)
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.queue.release(lease).await {
            warn!(lease = lease.id, error = %e, "failed to release outbox lease");
        }
    }
}
