//! Session bus - ordered, session-partitioned delivery of domain events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SessionBusClient (per queue)                │
//! │  send(envelopes)  - JSON + $type/$aqn, batched in order     │
//! │  subscribe(..)    - receive state machine per message       │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Transport traits                       │
//! │  TransportSender: create_message_batch / send_messages      │
//! │  SessionProcessor: run(callback) serially per session       │
//! │  SessionReceiver: get/set session state                     │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌─────────────────────┐             ┌─────────────────────────┐
//! │ InMemoryTransport   │             │ cloud service bus       │
//! │ (included)          │             │ (external)              │
//! └─────────────────────┘             └─────────────────────────┘
//! ```
//!
//! A session can be blocked through its state (`{"Blocked":true}`); while
//! blocked, its messages go to the error handler instead of the receive
//! handler. A message with subject `unlock` clears the state.

mod client;
mod error;
#[cfg(feature = "in-memory")]
mod in_memory;
mod processor;
mod sender;
mod session;
mod transport;

pub use client::{SessionBusClient, Subscription};
pub use error::{BusError, ReceiveError, TransportError};
#[cfg(feature = "in-memory")]
pub use in_memory::{
    BatchLimits, DeadLetter, InMemoryBatch, InMemorySender, InMemorySession,
    InMemorySessionProcessor, InMemoryTransport, InMemoryTransportOptions,
};
pub use processor::{process_session_message, ErrorHandler, ReceiveHandler, SessionDispatch};
pub use sender::MessageSender;
pub use session::SessionState;
pub use transport::{
    MessageBatch, ProcessMessage, ReceivedMessage, SessionProcessor, SessionProcessorOptions,
    SessionReceiver, Settlement, Transport, TransportSender, WireMessage, JSON_CONTENT_TYPE,
    QUALIFIED_TYPE_PROPERTY, TYPE_PROPERTY, UNLOCK_SUBJECT,
};
