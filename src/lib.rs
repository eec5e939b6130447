//! Reliable outbox dispatch over a session-partitioned message bus.
//!
//! Producers hand [`MessageEnvelope`]s to an [`OutboxMessageSender`], which
//! durably stores them. A recurring [`OutboxWorker`] claims stored items,
//! decodes them and sends them through the [`SessionBusClient`], which packs
//! them into transport batches. Consumers subscribe to the bus and receive
//! envelopes in order per session.
//!
//! ## Example
//!
//! ```
//! use outbox_dispatch::bus::MessageSender;
//! use outbox_dispatch::config::MessagingSettings;
//! use outbox_dispatch::{DependentAddedEvent, MessageEnvelope, Messaging};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let messaging = Messaging::in_memory(MessagingSettings::default()).unwrap();
//! let cancel = CancellationToken::new();
//!
//! messaging
//!     .sender()
//!     .send(vec![MessageEnvelope::for_subject(DependentAddedEvent::new("123", "456"))], &cancel)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(messaging.store().dispatch_outbox_items(&cancel).await.unwrap(), 1);
//! # });
//! ```

pub mod bus;
pub mod config;
mod envelope;
pub mod event;
mod messaging;
pub mod outbox;
pub mod outbox_worker;

pub use bus::{BusError, MessageSender, SessionBusClient, Subscription};
pub use config::{ConfigError, MessagingSettings};
pub use envelope::MessageEnvelope;
pub use event::{
    AccountClosedEvent, AccountCreatedEvent, DataSourcesBlockedEvent, DependentAddedEvent,
    DependentRemovedEvent, DomainEvent, EventContent, EventError, EventRegistry,
    NotificationChannel, NotificationChannelVerifiedEvent,
};
pub use messaging::{Messaging, SharedBus};
pub use outbox::{OutboxError, OutboxMessageSender, OutboxStore};
pub use outbox_worker::{DispatchTrigger, OutboxWorker, WorkerStats};
