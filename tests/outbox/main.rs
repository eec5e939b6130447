#![cfg(feature = "in-memory")]

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use outbox_dispatch::outbox::{
    InMemoryOutboxQueue, OutboxItem, OutboxItemMetadata, OutboxQueue, QueueError,
};
use outbox_dispatch::{
    AccountClosedEvent, AccountCreatedEvent, DataSourcesBlockedEvent, EventError, EventRegistry,
    MessageEnvelope, NotificationChannel, NotificationChannelVerifiedEvent, OutboxError,
    OutboxStore,
};
use tokio_util::sync::CancellationToken;

use support::{capture_errors, RecordingSender, UnreachableQueue};

fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 30, 0, 0, 0).unwrap()
}

fn store_with<Q: OutboxQueue>(queue: Q, sender: RecordingSender) -> OutboxStore<Q, RecordingSender> {
    OutboxStore::new(queue, sender, Arc::new(EventRegistry::new()))
}

// =============================================================================
// Store phase
// =============================================================================

#[tokio::test]
async fn stored_rows_carry_serialized_content_and_metadata() {
    let store = store_with(InMemoryOutboxQueue::new(), RecordingSender::default());
    let envelope = MessageEnvelope::new(AccountCreatedEvent::new("123", fixed_time()), "123")
        .with_created_on(fixed_time());

    store.store(&[envelope]).await.unwrap();

    assert_eq!(
        store.queue().items(),
        vec![OutboxItem {
            content: r#"{"Hdid":"123","RegistrationDate":"2020-01-30T00:00:00Z"}"#.to_string(),
            metadata: OutboxItemMetadata {
                created_on: fixed_time(),
                type_name: "AccountCreatedEvent".to_string(),
                session_id: "123".to_string(),
                qualified_name: "outbox_dispatch.events.AccountCreatedEvent".to_string(),
            },
        }]
    );
}

#[tokio::test]
async fn store_errors_propagate_unchanged() {
    let store = store_with(UnreachableQueue, RecordingSender::default());

    let err = store
        .store(&[MessageEnvelope::for_subject(AccountClosedEvent::new(
            "456",
            fixed_time(),
        ))])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OutboxError::Queue(QueueError::Unavailable(ref reason)) if reason == "connection refused"
    ));
}

// =============================================================================
// Dispatch phase
// =============================================================================

#[tokio::test]
async fn dispatch_reproduces_stored_envelopes() {
    let store = store_with(InMemoryOutboxQueue::new(), RecordingSender::default());
    let envelopes = vec![
        MessageEnvelope::new(AccountCreatedEvent::new("123", fixed_time()), "123")
            .with_created_on(fixed_time()),
        MessageEnvelope::for_subject(NotificationChannelVerifiedEvent::new(
            "123",
            NotificationChannel::Sms,
            "2505551234",
        )),
        MessageEnvelope::for_subject(DataSourcesBlockedEvent::new(
            "789",
            vec!["Immunization".into(), "Medication".into()],
        )),
    ];
    store.store(&envelopes).await.unwrap();

    let sent = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(sent, 3);
    let batches = store.sender().batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], envelopes);
    assert!(store.queue().is_empty());
}

#[tokio::test]
async fn dequeue_failure_is_returned_and_logged_once() {
    let (errors, _guard) = capture_errors();
    let store = store_with(UnreachableQueue, RecordingSender::default());

    let err = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OutboxError::Queue(QueueError::Unavailable(_))));
    assert_eq!(errors.count(), 1);
    assert!(store.sender().batches().is_empty());
}

#[tokio::test]
async fn send_failure_releases_the_batch_for_retry() {
    let (errors, _guard) = capture_errors();
    let store = store_with(InMemoryOutboxQueue::new(), RecordingSender::failing());
    store
        .store(&[MessageEnvelope::for_subject(AccountClosedEvent::new(
            "456",
            fixed_time(),
        ))])
        .await
        .unwrap();

    let err = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OutboxError::Send(_)));
    assert_eq!(err.to_string(), "failed to hand outbox items to the bus: bus offline");
    assert_eq!(errors.count(), 1);
    assert_eq!(store.queue().visible_len(), 1);
    assert_eq!(store.queue().attempts(), vec![1]);
}

#[tokio::test]
async fn unknown_type_in_a_row_fails_the_whole_batch() {
    let queue = InMemoryOutboxQueue::new();
    let mut item = OutboxItem::from_envelope(&MessageEnvelope::for_subject(
        AccountClosedEvent::new("456", fixed_time()),
    ))
    .unwrap();
    item.metadata.qualified_name = "retired.events.AccountArchivedEvent".into();
    item.metadata.type_name = "AccountArchivedEvent".into();
    queue.enqueue(vec![item]).unwrap();
    let store = store_with(queue, RecordingSender::default());

    let err = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OutboxError::Event(EventError::UnknownType(ref name)) if name == "retired.events.AccountArchivedEvent"
    ));
    assert!(store.sender().batches().is_empty());
    assert_eq!(store.queue().visible_len(), 1);
}

#[tokio::test]
async fn rows_without_qualified_name_decode_by_short_type() {
    let queue = InMemoryOutboxQueue::new();
    let mut item = OutboxItem::from_envelope(&MessageEnvelope::for_subject(
        AccountClosedEvent::new("456", fixed_time()),
    ))
    .unwrap();
    item.metadata.qualified_name.clear();
    queue.enqueue(vec![item]).unwrap();
    let store = store_with(queue, RecordingSender::default());

    let sent = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(sent, 1);
}

#[tokio::test]
async fn rows_with_unknown_qualified_name_decode_by_short_type() {
    let queue = InMemoryOutboxQueue::new();
    let envelope = MessageEnvelope::new(AccountClosedEvent::new("456", fixed_time()), "456")
        .with_created_on(fixed_time());
    let mut item = OutboxItem::from_envelope(&envelope).unwrap();
    item.metadata.qualified_name =
        "Legacy.Common.Events.AccountClosedEvent, Common, Version=1.0.0.0, Culture=neutral".into();
    queue.enqueue(vec![item]).unwrap();
    let store = store_with(queue, RecordingSender::default());

    let sent = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(sent, 1);
    assert_eq!(store.sender().batches(), vec![vec![envelope]]);
    assert!(store.queue().is_empty());
}

// =============================================================================
// Leases
// =============================================================================

#[tokio::test]
async fn expired_lease_makes_items_visible_again() {
    let queue = InMemoryOutboxQueue::new().with_lease_duration(Duration::from_millis(20));
    let store = store_with(queue, RecordingSender::default());
    store
        .store(&[MessageEnvelope::for_subject(AccountClosedEvent::new(
            "456",
            fixed_time(),
        ))])
        .await
        .unwrap();

    // A dispatcher that claims a batch and then disappears.
    let abandoned = store
        .queue()
        .dequeue(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(store.queue().visible_len(), 0);

    tokio::time::sleep(Duration::from_millis(40)).await;

    let sent = store
        .dispatch_outbox_items(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sent, 1);
    assert_eq!(store.queue().attempts(), Vec::<u32>::new());
    assert_eq!(
        store.queue().acknowledge(&abandoned.lease).await,
        Err(QueueError::UnknownLease(abandoned.lease.id))
    );
}

#[tokio::test]
async fn batch_size_bounds_each_dispatch() {
    let queue = InMemoryOutboxQueue::new().with_batch_size(2);
    let store = store_with(queue, RecordingSender::default());
    let envelopes: Vec<_> = (0..5)
        .map(|i| {
            MessageEnvelope::for_subject(AccountClosedEvent::new(i.to_string(), fixed_time()))
        })
        .collect();
    store.store(&envelopes).await.unwrap();

    let cancel = CancellationToken::new();
    let mut counts = Vec::new();
    loop {
        let sent = store.dispatch_outbox_items(&cancel).await.unwrap();
        if sent == 0 {
            break;
        }
        counts.push(sent);
    }

    assert_eq!(counts, vec![2, 2, 1]);
    let flattened: Vec<_> = store.sender().batches().into_iter().flatten().collect();
    assert_eq!(flattened, envelopes);
}
