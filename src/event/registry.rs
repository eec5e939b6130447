use std::collections::HashMap;

use super::domain_event::{
    AccountClosedEvent, AccountCreatedEvent, DataSourcesBlockedEvent, DependentAddedEvent,
    DependentRemovedEvent, DomainEvent, EventContent, NotificationChannelVerifiedEvent,
};
use super::error::EventError;

type Decoder = fn(&[u8]) -> Result<DomainEvent, serde_json::Error>;

fn decode_as<T: EventContent>(bytes: &[u8]) -> Result<DomainEvent, serde_json::Error> {
    serde_json::from_slice::<T>(bytes).map(Into::into)
}

/// Identity of a registered event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventType {
    pub type_name: &'static str,
    pub qualified_name: &'static str,
}

#[derive(Clone, Copy)]
struct Registration {
    event_type: EventType,
    decode: Decoder,
}

/// Maps type tags to decoders.
///
/// Every event type is reachable by both its short name and its qualified
/// name. The registry is built once and shared read-only, so resolving the
/// same name always yields the same type.
#[derive(Clone)]
pub struct EventRegistry {
    by_name: HashMap<&'static str, Registration>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// Registry holding every built-in event type.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry
            .register::<AccountCreatedEvent>()
            .register::<AccountClosedEvent>()
            .register::<DependentAddedEvent>()
            .register::<DependentRemovedEvent>()
            .register::<NotificationChannelVerifiedEvent>()
            .register::<DataSourcesBlockedEvent>();
        registry
    }

    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    pub fn register<T: EventContent>(&mut self) -> &mut Self {
        let registration = Registration {
            event_type: EventType {
                type_name: T::TYPE_NAME,
                qualified_name: T::QUALIFIED_NAME,
            },
            decode: decode_as::<T>,
        };
        self.by_name.insert(T::TYPE_NAME, registration);
        self.by_name.insert(T::QUALIFIED_NAME, registration);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<EventType> {
        self.by_name.get(name).map(|r| r.event_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Decode a JSON payload as the event type registered under `name`.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> Result<DomainEvent, EventError> {
        let registration = self
            .by_name
            .get(name)
            .ok_or_else(|| EventError::UnknownType(name.to_string()))?;
        (registration.decode)(bytes).map_err(|source| EventError::Json {
            type_name: registration.event_type.type_name.to_string(),
            source,
        })
    }

    /// Number of distinct registered event types.
    pub fn len(&self) -> usize {
        self.by_name.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
