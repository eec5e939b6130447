use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::trigger::DispatchTrigger;
use crate::bus::MessageSender;
use crate::outbox::{OutboxQueue, OutboxStore};

/// Shortest interval the worker polls at; a zero interval is raised to this.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Statistics from the dispatch worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Dispatch passes run, whether woken by the interval or the trigger.
    pub ticks: usize,
    pub items_dispatched: usize,
    pub failures: usize,
}

/// A background task that periodically drains the outbox to the bus.
///
/// Each wake-up runs exactly one [`OutboxStore::dispatch_outbox_items`] call,
/// and the loop is sequential, so dispatch calls never overlap.
///
/// ## Example
///
/// ```ignore
/// use outbox_dispatch::outbox_worker::{DispatchTrigger, OutboxWorker};
/// use std::time::Duration;
///
/// let trigger = DispatchTrigger::new();
/// let store = Arc::new(OutboxStore::new(queue, bus, registry).with_trigger(trigger.clone()));
///
/// let worker = OutboxWorker::spawn(store, Duration::from_secs(5), trigger);
///
/// // ... produce messages ...
///
/// let stats = worker.stop().await;
/// println!("Dispatched {} messages", stats.items_dispatched);
/// ```
pub struct OutboxWorker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl OutboxWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<Q, S>(
        store: Arc<OutboxStore<Q, S>>,
        interval: Duration,
        trigger: DispatchTrigger,
    ) -> Self
    where
        Q: OutboxQueue + 'static,
        S: MessageSender + 'static,
    {
        Self::spawn_with_cancel(store, interval, trigger, CancellationToken::new())
    }

    /// Spawn the worker, stopping it when `cancel` fires.
    pub fn spawn_with_cancel<Q, S>(
        store: Arc<OutboxStore<Q, S>>,
        interval: Duration,
        trigger: DispatchTrigger,
        cancel: CancellationToken,
    ) -> Self
    where
        Q: OutboxQueue + 'static,
        S: MessageSender + 'static,
    {
        let token = cancel.child_token();
        let run_token = token.clone();
        let handle = tokio::spawn(run(store, interval, trigger, run_token));

        Self {
            cancel: token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the worker and return its statistics.
    pub async fn stop(mut self) -> WorkerStats {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(error = %e, "outbox worker task failed");
                    WorkerStats::default()
                }
            },
            None => WorkerStats::default(),
        }
    }
}

impl Drop for OutboxWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<Q, S>(
    store: Arc<OutboxStore<Q, S>>,
    interval: Duration,
    trigger: DispatchTrigger,
    cancel: CancellationToken,
) -> WorkerStats
where
    Q: OutboxQueue,
    S: MessageSender,
{
    let interval = interval.max(MIN_INTERVAL);
    let mut stats = WorkerStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_ms = interval.as_millis() as u64, "outbox worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
        }

        stats.ticks += 1;
        match store.dispatch_outbox_items(&cancel).await {
            Ok(0) => {}
            Ok(count) => {
                stats.items_dispatched += count;
                debug!(count, "outbox worker dispatched items");
            }
            // Already logged by the store; the next wake-up retries.
            Err(_) => stats.failures += 1,
        }
    }

    info!(
        ticks = stats.ticks,
        items_dispatched = stats.items_dispatched,
        failures = stats.failures,
        "outbox worker stopped"
    );
    stats
}
