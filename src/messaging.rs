use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::{ErrorHandler, ReceiveHandler, SessionBusClient, Subscription, Transport};
use crate::config::{ConfigError, MessagingSettings};
use crate::event::EventRegistry;
use crate::outbox::{OutboxMessageSender, OutboxQueue, OutboxStore};
use crate::outbox_worker::{DispatchTrigger, OutboxWorker};

/// Bus client shared between the outbox store and subscribers.
pub type SharedBus<T> = Arc<SessionBusClient<T>>;

/// Fully wired messaging stack.
///
/// ```text
/// producer ──► OutboxMessageSender ──► OutboxQueue
///                                          │
///                           OutboxWorker ──┘ (interval / trigger)
///                                │
///                                ▼
///                        SessionBusClient ──► Transport ──► subscribe(handler)
/// ```
pub struct Messaging<Q, T: Transport> {
    settings: MessagingSettings,
    registry: Arc<EventRegistry>,
    bus: SharedBus<T>,
    store: Arc<OutboxStore<Q, SharedBus<T>>>,
    sender: OutboxMessageSender<Q, SharedBus<T>>,
    trigger: DispatchTrigger,
}

impl<Q, T> Messaging<Q, T>
where
    Q: OutboxQueue + 'static,
    T: Transport + 'static,
{
    pub fn new(settings: MessagingSettings, queue: Q, transport: T) -> Result<Self, ConfigError> {
        settings.validate()?;

        let registry = Arc::new(EventRegistry::new());
        let bus = Arc::new(
            SessionBusClient::new(transport, settings.queue_name.clone(), Arc::clone(&registry))
                .with_block_session_on_failure(settings.session.block_session_on_failure)
                .with_processor_options(settings.session.processor_options()),
        );
        let trigger = DispatchTrigger::new();
        let store = Arc::new(
            OutboxStore::new(queue, Arc::clone(&bus), Arc::clone(&registry))
                .with_trigger(trigger.clone()),
        );
        let sender = OutboxMessageSender::new(Arc::clone(&store));

        info!(queue = %settings.queue_name, "messaging configured");
        Ok(Self {
            settings,
            registry,
            bus,
            store,
            sender,
            trigger,
        })
    }

    pub fn settings(&self) -> &MessagingSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Producer-facing sender; writes to the outbox.
    pub fn sender(&self) -> OutboxMessageSender<Q, SharedBus<T>> {
        self.sender.clone()
    }

    pub fn store(&self) -> &Arc<OutboxStore<Q, SharedBus<T>>> {
        &self.store
    }

    pub fn bus(&self) -> &SharedBus<T> {
        &self.bus
    }

    /// Start the recurring dispatch job.
    pub fn spawn_worker(&self, cancel: &CancellationToken) -> OutboxWorker {
        OutboxWorker::spawn_with_cancel(
            Arc::clone(&self.store),
            self.settings.outbox.dispatch_interval(),
            self.trigger.clone(),
            cancel.clone(),
        )
    }

    pub fn subscribe<R, E>(&self, receive: R, errors: E, cancel: &CancellationToken) -> Subscription
    where
        R: ReceiveHandler + 'static,
        E: ErrorHandler + 'static,
    {
        self.bus.subscribe(receive, errors, cancel)
    }
}

#[cfg(feature = "in-memory")]
impl Messaging<crate::outbox::InMemoryOutboxQueue, crate::bus::InMemoryTransport> {
    /// Stack backed by the in-memory outbox queue and broker.
    pub fn in_memory(settings: MessagingSettings) -> Result<Self, ConfigError> {
        let queue = crate::outbox::InMemoryOutboxQueue::new()
            .with_batch_size(settings.outbox.batch_size)
            .with_lease_duration(settings.outbox.lease_duration());
        Self::new(settings, queue, crate::bus::InMemoryTransport::new())
    }
}
