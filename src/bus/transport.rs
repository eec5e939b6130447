//! Contracts for the session-partitioned broker behind the bus client.
//!
//! Implementations might include:
//! - `InMemoryTransport` - for testing and single-process scenarios
//! - a cloud service bus client with native sessions
//! - a broker without sessions plus an external session-state store

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::error::TransportError;

/// Application property carrying the short event type name.
pub const TYPE_PROPERTY: &str = "$type";

/// Application property carrying the qualified event type name.
pub const QUALIFIED_TYPE_PROPERTY: &str = "$aqn";

/// Subject of the control message that clears a blocked session.
pub const UNLOCK_SUBJECT: &str = "unlock";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// An outgoing message as the transport sees it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireMessage {
    pub session_id: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub application_properties: BTreeMap<String, String>,
}

impl WireMessage {
    pub fn new(session_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            session_id: session_id.into(),
            body,
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Control message that clears the blocked state of `session_id`.
    pub fn unlock(session_id: impl Into<String>) -> Self {
        Self::new(session_id, Vec::new()).with_subject(UNLOCK_SUBJECT)
    }

    /// Property value, treating an empty string as absent.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.application_properties
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Approximate encoded size, used for batch accounting.
    pub fn size_bytes(&self) -> usize {
        let properties: usize = self
            .application_properties
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        self.body.len()
            + self.session_id.len()
            + self.subject.as_ref().map_or(0, String::len)
            + self.content_type.as_ref().map_or(0, String::len)
            + properties
    }
}

/// A message handed to a session processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message: WireMessage,
    pub sequence_number: u64,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ReceivedMessage {
    pub fn session_id(&self) -> &str {
        &self.message.session_id
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }

    pub fn subject(&self) -> Option<&str> {
        self.message.subject.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.message.property(key)
    }
}

/// What the transport should do with a processed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Remove the message.
    Complete,
    /// Make the message available again.
    Abandon,
    /// Move the message to the dead-letter queue.
    DeadLetter { reason: String, description: String },
}

/// A bounded accumulator of outgoing messages.
pub trait MessageBatch: Send {
    /// Add `message`, or hand it back if the batch has no room for it.
    fn try_add(&mut self, message: WireMessage) -> Result<(), WireMessage>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait TransportSender: Send + Sync {
    type Batch: MessageBatch;

    async fn create_message_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Self::Batch, TransportError>;

    /// Send every message in `batch` atomically.
    async fn send_messages(
        &self,
        batch: Self::Batch,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;
}

/// Access to the session a message was received on.
#[async_trait]
pub trait SessionReceiver: Send + Sync {
    fn session_id(&self) -> &str;

    async fn get_session_state(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    async fn set_session_state(
        &self,
        state: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;
}

/// Callback invoked by a session processor.
///
/// The processor calls `process_message` serially within a session and
/// concurrently across sessions.
#[async_trait]
pub trait ProcessMessage: Send + Sync {
    async fn process_message(
        &self,
        message: &ReceivedMessage,
        session: &dyn SessionReceiver,
        cancel: &CancellationToken,
    ) -> Settlement;

    async fn process_error(&self, error: TransportError);
}

/// Options for a session processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionProcessorOptions {
    /// Restrict processing to these sessions; empty means all sessions.
    pub session_ids: Vec<String>,
    pub max_concurrent_sessions: usize,
}

impl Default for SessionProcessorOptions {
    fn default() -> Self {
        Self {
            session_ids: Vec::new(),
            max_concurrent_sessions: 8,
        }
    }
}

#[async_trait]
pub trait SessionProcessor: Send + Sync {
    /// Process messages until `cancel` fires, then wait for in-flight sessions.
    async fn run<P>(&self, callback: Arc<P>, cancel: CancellationToken) -> Result<(), TransportError>
    where
        P: ProcessMessage + 'static;
}

/// Client for a session-partitioned broker.
pub trait Transport: Send + Sync {
    type Sender: TransportSender + 'static;
    type Processor: SessionProcessor + 'static;

    fn create_sender(&self, queue: &str) -> Self::Sender;

    fn create_session_processor(
        &self,
        queue: &str,
        options: SessionProcessorOptions,
    ) -> Self::Processor;
}
