//! In-memory session broker for testing and single-process scenarios.
//!
//! Each queue holds one FIFO per session. A session is claimed by at most
//! one worker at a time, so messages in a session are processed serially
//! while different sessions run concurrently.
//!
//! ```text
//! sender ──► [queue] ──► session "a": m1 m2 m3   ◄── worker 1 (locked)
//!                   └──► session "b": m4         ◄── worker 2 (locked)
//!                   └──► dead letters / completed
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::TransportError;
use super::transport::{
    MessageBatch, ProcessMessage, ReceivedMessage, SessionProcessor, SessionProcessorOptions,
    SessionReceiver, Settlement, Transport, TransportSender, WireMessage,
};

/// Capacity of a single message batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_messages: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_bytes: 256 * 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryTransportOptions {
    pub batch_limits: BatchLimits,
    /// Deliveries after which an abandoned message is dead-lettered.
    pub max_delivery_count: u32,
    /// Upper bound on how long an idle processor waits before rescanning.
    pub idle_poll: Duration,
}

impl Default for InMemoryTransportOptions {
    fn default() -> Self {
        Self {
            batch_limits: BatchLimits::default(),
            max_delivery_count: 10,
            idle_poll: Duration::from_millis(50),
        }
    }
}

/// A message removed from its session by a dead-letter settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub message: ReceivedMessage,
    pub reason: String,
    pub description: String,
}

#[derive(Default)]
struct SessionSlot {
    pending: VecDeque<ReceivedMessage>,
    state: Option<Vec<u8>>,
    locked: bool,
}

#[derive(Default)]
struct QueueState {
    sessions: BTreeMap<String, SessionSlot>,
    dead_letters: Vec<DeadLetter>,
    completed: Vec<ReceivedMessage>,
    batches_created: usize,
    sent_batch_sizes: Vec<usize>,
    next_sequence: u64,
    cursor: Option<String>,
}

impl QueueState {
    fn push(&mut self, message: WireMessage) {
        self.next_sequence += 1;
        let received = ReceivedMessage {
            sequence_number: self.next_sequence,
            delivery_count: 0,
            enqueued_at: Utc::now(),
            message,
        };
        self.sessions
            .entry(received.message.session_id.clone())
            .or_default()
            .pending
            .push_back(received);
    }

    /// Claim the next unlocked session with pending work, round-robin.
    fn claim(&mut self, filter: &[String]) -> Option<String> {
        let eligible = |id: &String, slot: &SessionSlot| -> bool {
            !slot.locked
                && !slot.pending.is_empty()
                && (filter.is_empty() || filter.contains(id))
        };

        let after = match &self.cursor {
            Some(cursor) => self
                .sessions
                .range::<String, _>((Bound::Excluded(cursor), Bound::Unbounded))
                .find(|&(id, slot)| eligible(id, slot))
                .map(|(id, _)| id.clone()),
            None => None,
        };
        let session_id = after.or_else(|| {
            self.sessions
                .iter()
                .find(|&(id, slot)| eligible(id, slot))
                .map(|(id, _)| id.clone())
        })?;

        if let Some(slot) = self.sessions.get_mut(&session_id) {
            slot.locked = true;
        }
        self.cursor = Some(session_id.clone());
        Some(session_id)
    }
}

struct Broker {
    queues: Mutex<HashMap<String, QueueState>>,
    activity: Notify,
    options: InMemoryTransportOptions,
}

impl Broker {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>, TransportError> {
        self.queues
            .lock()
            .map_err(|_| TransportError::Unavailable("in-memory broker lock poisoned".into()))
    }

    fn with_queue<R>(
        &self,
        queue: &str,
        f: impl FnOnce(&mut QueueState) -> R,
    ) -> Result<R, TransportError> {
        let mut queues = self.lock()?;
        Ok(f(queues.entry(queue.to_string()).or_default()))
    }

    /// Read-only view for inspection helpers, ignoring poisoning.
    fn inspect<R>(&self, queue: &str, f: impl FnOnce(Option<&QueueState>) -> R) -> R {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        f(queues.get(queue))
    }

    /// Mark the head of the session as delivered once more and return it.
    fn next_message(
        &self,
        queue: &str,
        session_id: &str,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        self.with_queue(queue, |state| {
            let slot = state.sessions.get_mut(session_id)?;
            let head = slot.pending.front_mut()?;
            head.delivery_count += 1;
            Some(head.clone())
        })
    }

    /// Apply a settlement to the head of the session.
    ///
    /// Returns `true` when the session should keep being drained.
    fn settle(
        &self,
        queue: &str,
        session_id: &str,
        sequence_number: u64,
        settlement: Settlement,
    ) -> Result<bool, TransportError> {
        let max_delivery_count = self.options.max_delivery_count;
        self.with_queue(queue, |state| {
            let slot = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| TransportError::Rejected(format!("unknown session {session_id}")))?;
            match slot.pending.front() {
                Some(head) if head.sequence_number == sequence_number => {}
                _ => {
                    return Err(TransportError::Rejected(format!(
                        "message {sequence_number} is not at the head of session {session_id}"
                    )))
                }
            }

            match settlement {
                Settlement::Complete => {
                    if let Some(message) = slot.pending.pop_front() {
                        state.completed.push(message);
                    }
                    Ok(true)
                }
                Settlement::DeadLetter {
                    reason,
                    description,
                } => {
                    if let Some(message) = slot.pending.pop_front() {
                        state.dead_letters.push(DeadLetter {
                            message,
                            reason,
                            description,
                        });
                    }
                    Ok(true)
                }
                Settlement::Abandon => {
                    let exhausted = slot
                        .pending
                        .front()
                        .is_some_and(|m| m.delivery_count >= max_delivery_count);
                    if exhausted {
                        if let Some(message) = slot.pending.pop_front() {
                            warn!(
                                session_id,
                                sequence_number, "message exceeded max delivery count"
                            );
                            state.dead_letters.push(DeadLetter {
                                message,
                                reason: "MaxDeliveryCountExceeded".to_string(),
                                description: format!(
                                    "abandoned {max_delivery_count} times"
                                ),
                            });
                        }
                    }
                    // Hand the session back so other sessions get a turn.
                    Ok(false)
                }
            }
        })?
    }

    fn release_session(&self, queue: &str, session_id: &str) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = queues
            .get_mut(queue)
            .and_then(|state| state.sessions.get_mut(session_id))
        {
            slot.locked = false;
        }
        drop(queues);
        self.activity.notify_waiters();
    }
}

/// Session-partitioned broker kept entirely in memory.
///
/// Cloning yields another handle to the same broker.
///
/// ## Example
///
/// ```
/// use outbox_dispatch::bus::{InMemoryTransport, Transport, TransportSender, MessageBatch, WireMessage};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let transport = InMemoryTransport::new();
/// let sender = transport.create_sender("events");
/// let cancel = CancellationToken::new();
///
/// let mut batch = sender.create_message_batch(&cancel).await.unwrap();
/// batch.try_add(WireMessage::new("session-1", b"{}".to_vec())).unwrap();
/// sender.send_messages(batch, &cancel).await.unwrap();
///
/// assert_eq!(transport.pending_count("events"), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_options(InMemoryTransportOptions::default())
    }

    pub fn with_options(options: InMemoryTransportOptions) -> Self {
        Self {
            broker: Arc::new(Broker {
                queues: Mutex::new(HashMap::new()),
                activity: Notify::new(),
                options,
            }),
        }
    }

    pub fn options(&self) -> &InMemoryTransportOptions {
        &self.broker.options
    }

    /// Enqueue a raw message, bypassing batching.
    pub fn deliver(&self, queue: &str, message: WireMessage) -> Result<(), TransportError> {
        self.broker.with_queue(queue, |state| state.push(message))?;
        self.broker.activity.notify_waiters();
        Ok(())
    }

    pub fn set_session_state(
        &self,
        queue: &str,
        session_id: &str,
        state: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.broker.with_queue(queue, |queue_state| {
            queue_state
                .sessions
                .entry(session_id.to_string())
                .or_default()
                .state = state;
        })
    }

    pub fn session_state(&self, queue: &str, session_id: &str) -> Option<Vec<u8>> {
        self.broker.inspect(queue, |state| {
            state
                .and_then(|s| s.sessions.get(session_id))
                .and_then(|slot| slot.state.clone())
        })
    }

    /// Messages still waiting in a session, in delivery order.
    pub fn pending(&self, queue: &str, session_id: &str) -> Vec<ReceivedMessage> {
        self.broker.inspect(queue, |state| {
            state
                .and_then(|s| s.sessions.get(session_id))
                .map(|slot| slot.pending.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn pending_count(&self, queue: &str) -> usize {
        self.broker.inspect(queue, |state| {
            state.map_or(0, |s| s.sessions.values().map(|slot| slot.pending.len()).sum())
        })
    }

    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.broker
            .inspect(queue, |state| state.map(|s| s.dead_letters.clone()).unwrap_or_default())
    }

    pub fn completed(&self, queue: &str) -> Vec<ReceivedMessage> {
        self.broker
            .inspect(queue, |state| state.map(|s| s.completed.clone()).unwrap_or_default())
    }

    pub fn batches_created(&self, queue: &str) -> usize {
        self.broker
            .inspect(queue, |state| state.map_or(0, |s| s.batches_created))
    }

    pub fn sent_batch_sizes(&self, queue: &str) -> Vec<usize> {
        self.broker.inspect(queue, |state| {
            state.map(|s| s.sent_batch_sizes.clone()).unwrap_or_default()
        })
    }
}

impl Transport for InMemoryTransport {
    type Sender = InMemorySender;
    type Processor = InMemorySessionProcessor;

    fn create_sender(&self, queue: &str) -> InMemorySender {
        InMemorySender {
            broker: Arc::clone(&self.broker),
            queue: queue.to_string(),
        }
    }

    fn create_session_processor(
        &self,
        queue: &str,
        options: SessionProcessorOptions,
    ) -> InMemorySessionProcessor {
        InMemorySessionProcessor {
            broker: Arc::clone(&self.broker),
            queue: queue.to_string(),
            options,
        }
    }
}

/// Batch bounded by [`BatchLimits`].
#[derive(Debug)]
pub struct InMemoryBatch {
    limits: BatchLimits,
    messages: Vec<WireMessage>,
    bytes: usize,
}

impl InMemoryBatch {
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }
}

impl MessageBatch for InMemoryBatch {
    fn try_add(&mut self, message: WireMessage) -> Result<(), WireMessage> {
        let size = message.size_bytes();
        if self.messages.len() >= self.limits.max_messages
            || self.bytes.saturating_add(size) > self.limits.max_bytes
        {
            return Err(message);
        }
        self.bytes += size;
        self.messages.push(message);
        Ok(())
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

pub struct InMemorySender {
    broker: Arc<Broker>,
    queue: String,
}

#[async_trait]
impl TransportSender for InMemorySender {
    type Batch = InMemoryBatch;

    async fn create_message_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InMemoryBatch, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.broker
            .with_queue(&self.queue, |state| state.batches_created += 1)?;
        Ok(InMemoryBatch {
            limits: self.broker.options.batch_limits,
            messages: Vec::new(),
            bytes: 0,
        })
    }

    async fn send_messages(
        &self,
        batch: InMemoryBatch,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let count = batch.messages.len();
        self.broker.with_queue(&self.queue, |state| {
            state.sent_batch_sizes.push(count);
            for message in batch.messages {
                state.push(message);
            }
        })?;
        self.broker.activity.notify_waiters();
        debug!(queue = %self.queue, count, "in-memory batch accepted");
        Ok(())
    }
}

/// Receiver bound to one claimed session.
pub struct InMemorySession {
    broker: Arc<Broker>,
    queue: String,
    session_id: String,
}

#[async_trait]
impl SessionReceiver for InMemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn get_session_state(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.broker.with_queue(&self.queue, |state| {
            state
                .sessions
                .get(&self.session_id)
                .and_then(|slot| slot.state.clone())
        })
    }

    async fn set_session_state(
        &self,
        state: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.broker.with_queue(&self.queue, |queue_state| {
            queue_state
                .sessions
                .entry(self.session_id.clone())
                .or_default()
                .state = state;
        })
    }
}

pub struct InMemorySessionProcessor {
    broker: Arc<Broker>,
    queue: String,
    options: SessionProcessorOptions,
}

#[async_trait]
impl SessionProcessor for InMemorySessionProcessor {
    async fn run<P>(&self, callback: Arc<P>, cancel: CancellationToken) -> Result<(), TransportError>
    where
        P: ProcessMessage + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_sessions.max(1)));
        let idle_poll = self.broker.options.idle_poll;
        let mut sessions = JoinSet::new();

        loop {
            while let Some(joined) = sessions.try_join_next() {
                if let Err(e) = joined {
                    callback
                        .process_error(TransportError::Unavailable(e.to_string()))
                        .await;
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| TransportError::Unavailable(e.to_string()))?
                }
            };

            // Registered before scanning so a send racing the scan still wakes us.
            let activity = self.broker.activity.notified();
            let claimed = self
                .broker
                .with_queue(&self.queue, |state| state.claim(&self.options.session_ids))?;

            let Some(session_id) = claimed else {
                drop(permit);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = activity => {}
                    _ = tokio::time::sleep(idle_poll) => {}
                }
                continue;
            };

            let session = InMemorySession {
                broker: Arc::clone(&self.broker),
                queue: self.queue.clone(),
                session_id,
            };
            let callback = Arc::clone(&callback);
            let cancel = cancel.clone();
            sessions.spawn(async move {
                drain_session(&session, callback.as_ref(), &cancel).await;
                session
                    .broker
                    .release_session(&session.queue, &session.session_id);
                drop(permit);
            });
        }

        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                callback
                    .process_error(TransportError::Unavailable(e.to_string()))
                    .await;
            }
        }
        Ok(())
    }
}

async fn drain_session<P>(session: &InMemorySession, callback: &P, cancel: &CancellationToken)
where
    P: ProcessMessage + ?Sized,
{
    let broker = &session.broker;
    while !cancel.is_cancelled() {
        let message = match broker.next_message(&session.queue, &session.session_id) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                callback.process_error(e).await;
                break;
            }
        };

        let settlement = callback.process_message(&message, session, cancel).await;
        match broker.settle(
            &session.queue,
            &session.session_id,
            message.sequence_number,
            settlement,
        ) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                callback.process_error(e).await;
                break;
            }
        }
    }
}
