use thiserror::Error;

use crate::event::EventError;

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport rejected the request: {0}")]
    Rejected(String),

    #[error("transport operation cancelled")]
    Cancelled,
}

/// Errors from the send path of the bus client.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("{type_name} envelope has no session id")]
    MissingSessionId { type_name: &'static str },

    #[error("{type_name} message of {size} bytes does not fit in an empty batch")]
    MessageTooLarge { type_name: String, size: usize },
}

/// Defects found while handling an inbound message.
///
/// These are never returned up the transport stack; they are handed to the
/// caller's error handler and the receive handler is skipped.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("session {session_id} is blocked")]
    SessionBlocked { session_id: String },

    #[error("message {sequence_number} in session {session_id} carries no type discriminator")]
    MissingType {
        session_id: String,
        sequence_number: u64,
    },

    #[error("message {sequence_number} in session {session_id} has unsupported type `{type_name}`")]
    UnsupportedType {
        session_id: String,
        sequence_number: u64,
        type_name: String,
    },

    #[error("message {sequence_number} in session {session_id} is empty")]
    EmptyMessage {
        session_id: String,
        sequence_number: u64,
    },

    #[error("message {sequence_number} in session {session_id} could not be decoded: {source}")]
    Deserialize {
        session_id: String,
        sequence_number: u64,
        #[source]
        source: EventError,
    },

    #[error("session {session_id} has unreadable state: {source}")]
    SessionState {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReceiveError {
    /// Short machine-readable reason, used as the dead-letter reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ReceiveError::SessionBlocked { .. } => "SessionBlocked",
            ReceiveError::MissingType { .. } => "MissingType",
            ReceiveError::UnsupportedType { .. } => "UnsupportedType",
            ReceiveError::EmptyMessage { .. } => "EmptyMessage",
            ReceiveError::Deserialize { .. } => "DeserializationFailed",
            ReceiveError::SessionState { .. } => "SessionStateUnreadable",
            ReceiveError::Transport(_) => "TransportError",
        }
    }
}
