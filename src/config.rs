//! Messaging settings.
//!
//! Settings are plain serde structs so they can be loaded from whatever
//! configuration source the host uses. Every field has a default.
//!
//! ```
//! use outbox_dispatch::config::MessagingSettings;
//!
//! let settings = MessagingSettings::from_json(r#"{
//!     "queue_name": "account-events",
//!     "outbox": { "batch_size": 50 },
//!     "session": { "block_session_on_failure": true }
//! }"#).unwrap();
//!
//! assert_eq!(settings.outbox.batch_size, 50);
//! assert_eq!(settings.outbox.lease_duration().as_secs(), 60);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::SessionProcessorOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse messaging settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid messaging settings: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    /// Bus queue the outbox dispatches to and subscribers read from.
    pub queue_name: String,
    pub outbox: OutboxSettings,
    pub session: SessionSettings,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            queue_name: "outbox".to_string(),
            outbox: OutboxSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl MessagingSettings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Invalid("queue_name must not be empty".into()));
        }
        self.outbox.validate()?;
        self.session.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub dispatch_interval_ms: u64,
    /// Maximum items claimed per dispatch pass.
    pub batch_size: usize,
    /// How long a claimed batch stays invisible before it is redelivered.
    pub lease_duration_ms: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 5_000,
            batch_size: 100,
            lease_duration_ms: 60_000,
        }
    }
}

impl OutboxSettings {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "outbox.dispatch_interval_ms must be positive".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("outbox.batch_size must be positive".into()));
        }
        if self.lease_duration_ms == 0 {
            return Err(ConfigError::Invalid(
                "outbox.lease_duration_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Block a session when one of its messages is rejected as malformed.
    pub block_session_on_failure: bool,
    pub max_concurrent_sessions: usize,
    /// Sessions to process; empty means all.
    pub session_ids: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            block_session_on_failure: false,
            max_concurrent_sessions: 8,
            session_ids: Vec::new(),
        }
    }
}

impl SessionSettings {
    pub fn processor_options(&self) -> SessionProcessorOptions {
        SessionProcessorOptions {
            session_ids: self.session_ids.clone(),
            max_concurrent_sessions: self.max_concurrent_sessions,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "session.max_concurrent_sessions must be positive".into(),
            ));
        }
        Ok(())
    }
}
