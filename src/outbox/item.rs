use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::MessageEnvelope;
use crate::event::{EventError, EventRegistry};

/// Routing and identity metadata stored beside an outbox row's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboxItemMetadata {
    pub created_on: DateTime<Utc>,
    #[serde(rename = "Type")]
    pub type_name: String,
    pub session_id: String,
    #[serde(rename = "AssemblyQualifiedName")]
    pub qualified_name: String,
}

/// A durable outbox row: the JSON payload of one envelope plus its metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboxItem {
    pub content: String,
    pub metadata: OutboxItemMetadata,
}

impl OutboxItem {
    pub fn from_envelope(envelope: &MessageEnvelope) -> Result<Self, EventError> {
        let event = envelope.content();
        let content = event.to_json().map_err(|source| EventError::Json {
            type_name: event.type_name().to_string(),
            source,
        })?;

        Ok(Self {
            content,
            metadata: OutboxItemMetadata {
                created_on: envelope.created_on(),
                type_name: event.type_name().to_string(),
                session_id: envelope.session_id().to_string(),
                qualified_name: event.qualified_name().to_string(),
            },
        })
    }

    /// Rebuild the envelope, resolving the qualified name first and the short
    /// type name when the qualified name is empty or unknown.
    pub fn to_envelope(&self, registry: &EventRegistry) -> Result<MessageEnvelope, EventError> {
        let qualified = Some(self.metadata.qualified_name.as_str()).filter(|n| !n.is_empty());
        let short = Some(self.metadata.type_name.as_str()).filter(|n| !n.is_empty());

        let event_type = qualified
            .and_then(|name| registry.resolve(name))
            .or_else(|| short.and_then(|name| registry.resolve(name)))
            .ok_or_else(|| {
                EventError::UnknownType(qualified.or(short).unwrap_or_default().to_string())
            })?;
        let event = registry.decode(event_type.qualified_name, self.content.as_bytes())?;
        Ok(MessageEnvelope::new(event, self.metadata.session_id.clone())
            .with_created_on(self.metadata.created_on))
    }
}
