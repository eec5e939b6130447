#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use outbox_dispatch::bus::{ErrorHandler, ReceiveError, ReceiveHandler};
use outbox_dispatch::config::MessagingSettings;
use outbox_dispatch::{DomainEvent, MessageEnvelope};

pub const QUEUE: &str = "pipeline";

pub fn settings() -> MessagingSettings {
    let mut settings = MessagingSettings {
        queue_name: QUEUE.to_string(),
        ..Default::default()
    };
    settings.outbox.dispatch_interval_ms = 20;
    settings
}

/// Receive handler and error handler that record what they saw.
#[derive(Clone, Default)]
pub struct Inbox {
    received: Arc<Mutex<Vec<(String, DomainEvent)>>>,
    rejected: Arc<Mutex<Vec<String>>>,
}

impl Inbox {
    pub fn received(&self) -> Vec<(String, DomainEvent)> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_for(&self, session_id: &str) -> Vec<DomainEvent> {
        self.received()
            .into_iter()
            .filter(|(s, _)| s == session_id)
            .map(|(_, event)| event)
            .collect()
    }

    /// Dead-letter reasons reported to the error handler, in order.
    pub fn rejected(&self) -> Vec<String> {
        self.rejected.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReceiveHandler for Inbox {
    async fn handle(&self, session_id: &str, envelopes: Vec<MessageEnvelope>) -> bool {
        let mut received = self.received.lock().unwrap();
        for envelope in envelopes {
            received.push((session_id.to_string(), envelope.into_content()));
        }
        true
    }
}

#[async_trait]
impl ErrorHandler for Inbox {
    async fn on_error(&self, error: ReceiveError) {
        self.rejected.lock().unwrap().push(error.reason().to_string());
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within two seconds");
}
