use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

/// A domain event paired with its routing metadata.
///
/// All envelopes sharing a `session_id` are delivered in order to a single
/// consumer at a time. `created_on` is fixed when the envelope is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEnvelope {
    content: DomainEvent,
    session_id: String,
    created_on: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn new(content: impl Into<DomainEvent>, session_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            session_id: session_id.into(),
            created_on: Utc::now(),
        }
    }

    /// Build an envelope keyed by the event's own subject.
    ///
    /// ```
    /// use outbox_dispatch::{AccountClosedEvent, MessageEnvelope};
    ///
    /// let envelope = MessageEnvelope::for_subject(AccountClosedEvent::new("456", chrono::Utc::now()));
    /// assert_eq!(envelope.session_id(), "456");
    /// ```
    pub fn for_subject(content: impl Into<DomainEvent>) -> Self {
        let content = content.into();
        let session_id = content.subject().to_string();
        Self::new(content, session_id)
    }

    /// Override the creation time while building the envelope.
    pub fn with_created_on(mut self, created_on: DateTime<Utc>) -> Self {
        self.created_on = created_on;
        self
    }

    pub fn content(&self) -> &DomainEvent {
        &self.content
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Creation time as Unix milliseconds.
    pub fn created_on_timestamp(&self) -> i64 {
        self.created_on.timestamp_millis()
    }

    pub fn into_content(self) -> DomainEvent {
        self.content
    }

    /// Equality on content and session, ignoring creation time.
    pub fn same_message(&self, other: &MessageEnvelope) -> bool {
        self.content == other.content && self.session_id == other.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AccountCreatedEvent, DependentAddedEvent};
    use chrono::TimeZone;

    #[test]
    fn for_subject_uses_event_subject() {
        let envelope = MessageEnvelope::for_subject(DependentAddedEvent::new("123", "456"));
        assert_eq!(envelope.session_id(), "123");
        assert_eq!(envelope.content().type_name(), "DependentAddedEvent");
    }

    #[test]
    fn timestamp_matches_created_on() {
        let at = Utc.with_ymd_and_hms(2020, 1, 30, 0, 0, 0).unwrap();
        let envelope =
            MessageEnvelope::new(AccountCreatedEvent::new("123", at), "123").with_created_on(at);
        assert_eq!(envelope.created_on(), at);
        assert_eq!(envelope.created_on_timestamp(), 1_580_342_400_000);
    }

    #[test]
    fn same_message_ignores_creation_time() {
        let at = Utc.with_ymd_and_hms(2020, 1, 30, 0, 0, 0).unwrap();
        let a = MessageEnvelope::new(AccountCreatedEvent::new("123", at), "123");
        let b = a.clone().with_created_on(at);
        assert!(a.same_message(&b));

        let c = MessageEnvelope::new(AccountCreatedEvent::new("123", at), "999");
        assert!(!a.same_message(&c));
    }

    #[test]
    fn envelope_array_serializes() {
        let envelopes = vec![
            MessageEnvelope::for_subject(DependentAddedEvent::new("1", "2")),
            MessageEnvelope::for_subject(DependentAddedEvent::new("1", "3")),
        ];
        let bytes = serde_json::to_vec(&envelopes).unwrap();
        let back: Vec<MessageEnvelope> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, envelopes);
    }
}
