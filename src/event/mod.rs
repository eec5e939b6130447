//! Domain events carried by the outbox and the bus.
//!
//! Events form a closed enum ([`DomainEvent`]). The string type tags used on
//! the wire and in outbox rows are resolved through an explicit
//! [`EventRegistry`] that maps each tag to a decoder; an unknown tag is a
//! decode error, never a silent `None` payload.

mod domain_event;
mod error;
mod registry;

pub use domain_event::{
    AccountClosedEvent, AccountCreatedEvent, DataSourcesBlockedEvent, DependentAddedEvent,
    DependentRemovedEvent, DomainEvent, EventContent, NotificationChannel,
    NotificationChannelVerifiedEvent,
};
pub use error::EventError;
pub use registry::{EventRegistry, EventType};
