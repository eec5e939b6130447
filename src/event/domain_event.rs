use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A concrete event payload that can travel through the outbox and the bus.
///
/// `TYPE_NAME` is the short discriminator carried as `$type`;
/// `QUALIFIED_NAME` is the stable fully-qualified identity carried as `$aqn`
/// and stored in outbox rows. Both are part of the wire contract, so they
/// must never change for an existing event type.
pub trait EventContent:
    Serialize + DeserializeOwned + Into<DomainEvent> + Send + Sync + 'static
{
    const TYPE_NAME: &'static str;
    const QUALIFIED_NAME: &'static str;

    /// The natural ordering key for this event (the subject's identifier).
    fn subject(&self) -> &str;
}

macro_rules! event_content {
    ($ty:ident => $variant:ident, subject: $subject:ident) => {
        impl EventContent for $ty {
            const TYPE_NAME: &'static str = stringify!($ty);
            const QUALIFIED_NAME: &'static str =
                concat!("outbox_dispatch.events.", stringify!($ty));

            fn subject(&self) -> &str {
                &self.$subject
            }
        }

        impl From<$ty> for DomainEvent {
            fn from(event: $ty) -> Self {
                DomainEvent::$variant(event)
            }
        }
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountCreatedEvent {
    pub hdid: String,
    pub registration_date: DateTime<Utc>,
}

impl AccountCreatedEvent {
    pub fn new(hdid: impl Into<String>, registration_date: DateTime<Utc>) -> Self {
        Self {
            hdid: hdid.into(),
            registration_date,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountClosedEvent {
    pub hdid: String,
    pub closed_date: DateTime<Utc>,
}

impl AccountClosedEvent {
    pub fn new(hdid: impl Into<String>, closed_date: DateTime<Utc>) -> Self {
        Self {
            hdid: hdid.into(),
            closed_date,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DependentAddedEvent {
    pub delegate_hdid: String,
    pub dependent_hdid: String,
}

impl DependentAddedEvent {
    pub fn new(delegate_hdid: impl Into<String>, dependent_hdid: impl Into<String>) -> Self {
        Self {
            delegate_hdid: delegate_hdid.into(),
            dependent_hdid: dependent_hdid.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DependentRemovedEvent {
    pub delegate_hdid: String,
    pub dependent_hdid: String,
}

impl DependentRemovedEvent {
    pub fn new(delegate_hdid: impl Into<String>, dependent_hdid: impl Into<String>) -> Self {
        Self {
            delegate_hdid: delegate_hdid.into(),
            dependent_hdid: dependent_hdid.into(),
        }
    }
}

/// Channel over which a subject verified a contact address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationChannel {
    Email,
    Sms,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationChannelVerifiedEvent {
    pub hdid: String,
    pub channel: NotificationChannel,
    pub address: String,
}

impl NotificationChannelVerifiedEvent {
    pub fn new(
        hdid: impl Into<String>,
        channel: NotificationChannel,
        address: impl Into<String>,
    ) -> Self {
        Self {
            hdid: hdid.into(),
            channel,
            address: address.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataSourcesBlockedEvent {
    pub hdid: String,
    pub data_sources: Vec<String>,
}

impl DataSourcesBlockedEvent {
    pub fn new(hdid: impl Into<String>, data_sources: Vec<String>) -> Self {
        Self {
            hdid: hdid.into(),
            data_sources,
        }
    }
}

event_content!(AccountCreatedEvent => AccountCreated, subject: hdid);
event_content!(AccountClosedEvent => AccountClosed, subject: hdid);
event_content!(DependentAddedEvent => DependentAdded, subject: delegate_hdid);
event_content!(DependentRemovedEvent => DependentRemoved, subject: delegate_hdid);
event_content!(NotificationChannelVerifiedEvent => NotificationChannelVerified, subject: hdid);
event_content!(DataSourcesBlockedEvent => DataSourcesBlocked, subject: hdid);

/// Closed set of domain events the pipeline knows how to carry.
///
/// Serialized on its own, the enum is adjacently tagged
/// (`{"$type": "AccountCreatedEvent", "Content": {...}}`). Outbox rows and wire
/// messages carry only the payload and keep the tag in metadata instead; see
/// [`DomainEvent::to_json`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type", content = "Content")]
pub enum DomainEvent {
    #[serde(rename = "AccountCreatedEvent")]
    AccountCreated(AccountCreatedEvent),
    #[serde(rename = "AccountClosedEvent")]
    AccountClosed(AccountClosedEvent),
    #[serde(rename = "DependentAddedEvent")]
    DependentAdded(DependentAddedEvent),
    #[serde(rename = "DependentRemovedEvent")]
    DependentRemoved(DependentRemovedEvent),
    #[serde(rename = "NotificationChannelVerifiedEvent")]
    NotificationChannelVerified(NotificationChannelVerifiedEvent),
    #[serde(rename = "DataSourcesBlockedEvent")]
    DataSourcesBlocked(DataSourcesBlockedEvent),
}

impl DomainEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            DomainEvent::AccountCreated(_) => AccountCreatedEvent::TYPE_NAME,
            DomainEvent::AccountClosed(_) => AccountClosedEvent::TYPE_NAME,
            DomainEvent::DependentAdded(_) => DependentAddedEvent::TYPE_NAME,
            DomainEvent::DependentRemoved(_) => DependentRemovedEvent::TYPE_NAME,
            DomainEvent::NotificationChannelVerified(_) => {
                NotificationChannelVerifiedEvent::TYPE_NAME
            }
            DomainEvent::DataSourcesBlocked(_) => DataSourcesBlockedEvent::TYPE_NAME,
        }
    }

    pub fn qualified_name(&self) -> &'static str {
        match self {
            DomainEvent::AccountCreated(_) => AccountCreatedEvent::QUALIFIED_NAME,
            DomainEvent::AccountClosed(_) => AccountClosedEvent::QUALIFIED_NAME,
            DomainEvent::DependentAdded(_) => DependentAddedEvent::QUALIFIED_NAME,
            DomainEvent::DependentRemoved(_) => DependentRemovedEvent::QUALIFIED_NAME,
            DomainEvent::NotificationChannelVerified(_) => {
                NotificationChannelVerifiedEvent::QUALIFIED_NAME
            }
            DomainEvent::DataSourcesBlocked(_) => DataSourcesBlockedEvent::QUALIFIED_NAME,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            DomainEvent::AccountCreated(e) => e.subject(),
            DomainEvent::AccountClosed(e) => e.subject(),
            DomainEvent::DependentAdded(e) => e.subject(),
            DomainEvent::DependentRemoved(e) => e.subject(),
            DomainEvent::NotificationChannelVerified(e) => e.subject(),
            DomainEvent::DataSourcesBlocked(e) => e.subject(),
        }
    }

    /// Serialize the payload alone, without the type tag.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            DomainEvent::AccountCreated(e) => serde_json::to_string(e),
            DomainEvent::AccountClosed(e) => serde_json::to_string(e),
            DomainEvent::DependentAdded(e) => serde_json::to_string(e),
            DomainEvent::DependentRemoved(e) => serde_json::to_string(e),
            DomainEvent::NotificationChannelVerified(e) => serde_json::to_string(e),
            DomainEvent::DataSourcesBlocked(e) => serde_json::to_string(e),
        }
    }
}
