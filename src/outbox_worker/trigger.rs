use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes the dispatch worker ahead of its next tick.
///
/// Clones share the same signal. Notifications made while the worker is busy
/// are coalesced into a single extra pass.
#[derive(Clone, Debug, Default)]
pub struct DispatchTrigger {
    notify: Arc<Notify>,
}

impl DispatchTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}
