//! Sender trait shared by the outbox façade and the bus client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envelope::MessageEnvelope;

/// Trait for anything that accepts envelopes for delivery.
///
/// The outbox façade implements it by persisting, the bus client by
/// transmitting, so producers and the dispatcher are written against the same
/// contract.
#[async_trait]
pub trait MessageSender: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(
        &self,
        envelopes: Vec<MessageEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<(), Self::Error>;
}

#[async_trait]
impl<T: MessageSender + ?Sized> MessageSender for Arc<T> {
    type Error = T::Error;

    async fn send(
        &self,
        envelopes: Vec<MessageEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<(), Self::Error> {
        (**self).send(envelopes, cancel).await
    }
}
