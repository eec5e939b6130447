//! Receive-side state machine for session messages.
//!
//! ```text
//! ReceivedMessage
//!      │
//!      ▼
//!  read session state ──(transport/parse error)──► error handler, Abandon
//!      │
//!      ├─ subject "unlock" ──► clear state, Complete
//!      ├─ blocked ───────────► error handler, DeadLetter
//!      ├─ no $aqn / $type ───► error handler, DeadLetter
//!      ├─ unknown type ──────► error handler, DeadLetter
//!      ├─ empty body ────────► error handler, DeadLetter
//!      ├─ bad JSON ──────────► error handler, DeadLetter
//!      ▼
//!  receive handler ──(true)──► Complete
//!                  └─(false)─► Abandon
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{ReceiveError, TransportError};
use super::session::SessionState;
use super::transport::{
    ProcessMessage, ReceivedMessage, SessionReceiver, Settlement, QUALIFIED_TYPE_PROPERTY,
    TYPE_PROPERTY, UNLOCK_SUBJECT,
};
use crate::envelope::MessageEnvelope;
use crate::event::EventRegistry;

/// Caller-supplied consumer of decoded envelopes.
///
/// Returns `true` when the envelopes were handled and the message may be
/// completed.
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    async fn handle(&self, session_id: &str, envelopes: Vec<MessageEnvelope>) -> bool;
}

#[async_trait]
impl<F, Fut> ReceiveHandler for F
where
    F: Fn(String, Vec<MessageEnvelope>) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn handle(&self, session_id: &str, envelopes: Vec<MessageEnvelope>) -> bool {
        (self)(session_id.to_string(), envelopes).await
    }
}

/// Caller-supplied sink for messages that could not be handled.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn on_error(&self, error: ReceiveError);
}

#[async_trait]
impl<F, Fut> ErrorHandler for F
where
    F: Fn(ReceiveError) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_error(&self, error: ReceiveError) {
        (self)(error).await
    }
}

/// Run one received message through the receive state machine.
///
/// Never fails: every defect is reported to `errors` and mapped to a
/// [`Settlement`].
pub async fn process_session_message<R, E>(
    registry: &EventRegistry,
    block_on_failure: bool,
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
    let session_id = session.session_id().to_string();
    let sequence_number = message.sequence_number;

    let raw_state = match session.get_session_state(cancel).await {
        Ok(state) => state,
        Err(e) => {
            errors.on_error(ReceiveError::Transport(e)).await;
            return Settlement::Abandon;
        }
    };

    if message.subject() == Some(UNLOCK_SUBJECT) {
        return match session.set_session_state(None, cancel).await {
            Ok(()) => {
                info!(session_id = %session_id, "session unlocked");
                Settlement::Complete
            }
            Err(e) => {
                errors.on_error(ReceiveError::Transport(e)).await;
                Settlement::Abandon
            }
        };
    }

    let state = match SessionState::from_bytes(raw_state.as_deref()) {
        Ok(state) => state,
        Err(source) => {
            errors
                .on_error(ReceiveError::SessionState { session_id, source })
                .await;
            return Settlement::Abandon;
        }
    };

    if state.blocked {
        let error = ReceiveError::SessionBlocked {
            session_id: session_id.clone(),
        };
        return reject(error, None, session, errors, cancel).await;
    }

    let envelope = match decode(registry, &session_id, message) {
        Ok(envelope) => envelope,
        Err(error) => {
            let block = block_on_failure.then_some(session_id.as_str());
            return reject(error, block, session, errors, cancel).await;
        }
    };

    debug!(
        session_id = %session_id,
        sequence_number,
        type_name = envelope.content().type_name(),
        "received message"
    );

    if receive.handle(&session_id, vec![envelope]).await {
        Settlement::Complete
    } else {
        warn!(session_id = %session_id, sequence_number, "receive handler declined message");
        Settlement::Abandon
    }
}

fn decode(
    registry: &EventRegistry,
    session_id: &str,
    message: &ReceivedMessage,
) -> Result<MessageEnvelope, ReceiveError> {
    let sequence_number = message.sequence_number;

    let qualified = message.property(QUALIFIED_TYPE_PROPERTY);
    let short = message.property(TYPE_PROPERTY);
    let requested = match qualified.or(short) {
        Some(name) => name,
        None => {
            return Err(ReceiveError::MissingType {
                session_id: session_id.to_string(),
                sequence_number,
            })
        }
    };

    let event_type = qualified
        .and_then(|name| registry.resolve(name))
        .or_else(|| short.and_then(|name| registry.resolve(name)))
        .ok_or_else(|| ReceiveError::UnsupportedType {
            session_id: session_id.to_string(),
            sequence_number,
            type_name: requested.to_string(),
        })?;

    if message.body().is_empty() {
        return Err(ReceiveError::EmptyMessage {
            session_id: session_id.to_string(),
            sequence_number,
        });
    }

    let content = registry
        .decode(event_type.qualified_name, message.body())
        .map_err(|source| ReceiveError::Deserialize {
            session_id: session_id.to_string(),
            sequence_number,
            source,
        })?;

    Ok(MessageEnvelope::new(content, session_id).with_created_on(message.enqueued_at))
}

async fn reject<E>(
    error: ReceiveError,
    block: Option<&str>,
    session: &dyn SessionReceiver,
    errors: &E,
    cancel: &CancellationToken,
) -> Settlement
where
    E: ErrorHandler + ?Sized,
{
    let settlement = Settlement::DeadLetter {
        reason: error.reason().to_string(),
        description: error.to_string(),
    };

    if let Some(session_id) = block {
        if let Err(e) = block_session(session, cancel).await {
            warn!(session_id = %session_id, error = %e, "failed to block session");
        }
    }

    errors.on_error(error).await;
    settlement
}

async fn block_session(
    session: &dyn SessionReceiver,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let state = SessionState::blocked()
        .to_bytes()
        .map_err(|e| TransportError::Rejected(e.to_string()))?;
    session.set_session_state(Some(state), cancel).await
}

/// [`ProcessMessage`] callback binding the state machine to caller handlers.
pub struct SessionDispatch<R, E> {
    registry: Arc<EventRegistry>,
    block_on_failure: bool,
    receive: R,
    errors: E,
}

impl<R, E> SessionDispatch<R, E> {
    pub fn new(registry: Arc<EventRegistry>, receive: R, errors: E) -> Self {
        Self {
            registry,
            block_on_failure: false,
            receive,
            errors,
        }
    }

    /// Mark the session blocked when a message is rejected as malformed.
    pub fn with_block_on_failure(mut self, block: bool) -> Self {
        self.block_on_failure = block;
        self
    }
}

#[async_trait]
impl<R: ReceiveHandler, E: ErrorHandler> ProcessMessage for SessionDispatch<R, E> {
    async fn process_message(
        &self,
        message: &ReceivedMessage,
        session: &dyn SessionReceiver,
        cancel: &CancellationToken,
    ) -> Settlement {
        process_session_message(
            &self.registry,
            self.block_on_failure,
            message,
            session,
            &self.receive,
            &self.errors,
            cancel,
        )
        .await
    }

    async fn process_error(&self, error: TransportError) {
        self.errors.on_error(ReceiveError::Transport(error)).await;
    }
}
