use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::OutboxError;
use super::queue::OutboxQueue;
use super::store::OutboxStore;
use crate::bus::MessageSender;
use crate::envelope::MessageEnvelope;

/// Application-facing sender that writes to the outbox instead of the bus.
///
/// Producers call [`MessageSender::send`]; the envelopes are durably stored
/// before the call returns and are transmitted later by the dispatch worker.
/// Persistence errors are returned unchanged.
pub struct OutboxMessageSender<Q, S> {
    store: Arc<OutboxStore<Q, S>>,
}

impl<Q, S> Clone for OutboxMessageSender<Q, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<Q, S> OutboxMessageSender<Q, S> {
    pub fn new(store: Arc<OutboxStore<Q, S>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<OutboxStore<Q, S>> {
        &self.store
    }
}

#[async_trait]
impl<Q: OutboxQueue, S: MessageSender> MessageSender for OutboxMessageSender<Q, S> {
    type Error = OutboxError;

    async fn send(
        &self,
        envelopes: Vec<MessageEnvelope>,
        _cancel: &CancellationToken,
    ) -> Result<(), OutboxError> {
        self.store.store(&envelopes).await
    }
}
