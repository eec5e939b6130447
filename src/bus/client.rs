use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::BusError;
use super::processor::{process_session_message, ErrorHandler, ReceiveHandler, SessionDispatch};
use super::sender::MessageSender;
use super::transport::{
    MessageBatch, ProcessMessage, ReceivedMessage, SessionProcessor, SessionProcessorOptions,
    SessionReceiver, Settlement, Transport, TransportSender, WireMessage, JSON_CONTENT_TYPE,
    QUALIFIED_TYPE_PROPERTY, TYPE_PROPERTY,
};
use crate::envelope::MessageEnvelope;
use crate::event::{EventError, EventRegistry};

/// Session-partitioned bus client over a [`Transport`].
///
/// Outgoing envelopes are packed into as few transport batches as the
/// transport accepts, preserving order. Incoming messages run through the
/// receive state machine before reaching the caller's handler.
///
/// ## Example
///
/// ```ignore
/// let bus = SessionBusClient::new(transport, "events", Arc::new(EventRegistry::new()));
/// bus.send(vec![MessageEnvelope::for_subject(event)], &cancel).await?;
///
/// let subscription = bus.subscribe(
///     |session_id, envelopes| async move { handle(session_id, envelopes).await },
///     |error| async move { tracing::warn!(%error, "rejected message") },
///     &cancel,
/// );
/// ```
pub struct SessionBusClient<T: Transport> {
    transport: T,
    sender: T::Sender,
    queue: String,
    registry: Arc<EventRegistry>,
    block_session_on_failure: bool,
    processor_options: SessionProcessorOptions,
}

impl<T: Transport> SessionBusClient<T> {
    pub fn new(transport: T, queue: impl Into<String>, registry: Arc<EventRegistry>) -> Self {
        let queue = queue.into();
        let sender = transport.create_sender(&queue);
        Self {
            transport,
            sender,
            queue,
            registry,
            block_session_on_failure: false,
            processor_options: SessionProcessorOptions::default(),
        }
    }

    /// Mark a session blocked when one of its messages is rejected as malformed.
    pub fn with_block_session_on_failure(mut self, block: bool) -> Self {
        self.block_session_on_failure = block;
        self
    }

    pub fn with_processor_options(mut self, options: SessionProcessorOptions) -> Self {
        self.processor_options = options;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Send envelopes in order, splitting them across as many batches as needed.
    pub async fn send(
        &self,
        envelopes: Vec<MessageEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        if envelopes.is_empty() {
            return Ok(());
        }

        let messages = envelopes
            .iter()
            .map(to_wire_message)
            .collect::<Result<Vec<_>, _>>()?;
        let count = messages.len();
        let mut batches = 0usize;

        let mut batch = self.sender.create_message_batch(cancel).await?;
        for message in messages {
            let Err(message) = batch.try_add(message) else {
                continue;
            };
            if batch.is_empty() {
                return Err(too_large(message));
            }

            self.sender.send_messages(batch, cancel).await?;
            batches += 1;

            batch = self.sender.create_message_batch(cancel).await?;
            if let Err(message) = batch.try_add(message) {
                return Err(too_large(message));
            }
        }

        if !batch.is_empty() {
            self.sender.send_messages(batch, cancel).await?;
            batches += 1;
        }

        debug!(queue = %self.queue, count, batches, "sent messages");
        Ok(())
    }

    /// Run one received message through the receive state machine.
    pub async fn handle_process_message<R, E>(
        &self,
        message: &ReceivedMessage,
        session: &dyn SessionReceiver,
        receive: &R,
        errors: &E,
        cancel: &CancellationToken,
    ) -> Settlement
    where
        R: ReceiveHandler + ?Sized,
        E: ErrorHandler + ?Sized,
    {
        process_session_message(
            &self.registry,
            self.block_session_on_failure,
            message,
            session,
            receive,
            errors,
            cancel,
        )
        .await
    }

    /// Start a session processor delivering decoded envelopes to `receive`.
    ///
    /// Processing stops when `cancel` fires or the returned subscription is
    /// stopped or dropped.
    pub fn subscribe<R, E>(&self, receive: R, errors: E, cancel: &CancellationToken) -> Subscription
    where
        R: ReceiveHandler + 'static,
        E: ErrorHandler + 'static,
    {
        let processor = self
            .transport
            .create_session_processor(&self.queue, self.processor_options.clone());
        let dispatch = Arc::new(
            SessionDispatch::new(Arc::clone(&self.registry), receive, errors)
                .with_block_on_failure(self.block_session_on_failure),
        );

        let token = cancel.child_token();
        let run_token = token.clone();
        let queue = self.queue.clone();

        let handle = tokio::spawn(async move {
            info!(queue = %queue, "session processor started");
            if let Err(e) = processor.run(Arc::clone(&dispatch), run_token).await {
                dispatch.process_error(e).await;
            }
            info!(queue = %queue, "session processor stopped");
        });

        Subscription {
            cancel: token,
            handle: Some(handle),
        }
    }
}

#[async_trait]
impl<T: Transport> MessageSender for SessionBusClient<T> {
    type Error = BusError;

    async fn send(
        &self,
        envelopes: Vec<MessageEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        SessionBusClient::send(self, envelopes, cancel).await
    }
}

/// Handle to a running session processor.
pub struct Subscription {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the processor to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the processor and wait for in-flight sessions to settle.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "session processor task failed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn to_wire_message(envelope: &MessageEnvelope) -> Result<WireMessage, BusError> {
    let content = envelope.content();
    if envelope.session_id().is_empty() {
        return Err(BusError::MissingSessionId {
            type_name: content.type_name(),
        });
    }

    let body = content.to_json().map_err(|source| EventError::Json {
        type_name: content.type_name().to_string(),
        source,
    })?;

    let mut message = WireMessage::new(envelope.session_id(), body.into_bytes())
        .with_property(TYPE_PROPERTY, content.type_name())
        .with_property(QUALIFIED_TYPE_PROPERTY, content.qualified_name());
    message.content_type = Some(JSON_CONTENT_TYPE.to_string());
    Ok(message)
}

fn too_large(message: WireMessage) -> BusError {
    BusError::MessageTooLarge {
        type_name: message.property(TYPE_PROPERTY).unwrap_or_default().to_string(),
        size: message.size_bytes(),
    }
}
