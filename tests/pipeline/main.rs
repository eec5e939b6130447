#![cfg(feature = "in-memory")]

mod support;

use chrono::Utc;
use outbox_dispatch::bus::{
    MessageSender, SessionState, WireMessage, QUALIFIED_TYPE_PROPERTY, TYPE_PROPERTY,
};
use outbox_dispatch::{
    AccountClosedEvent, AccountCreatedEvent, DependentAddedEvent, DependentRemovedEvent,
    DomainEvent, MessageEnvelope, Messaging,
};
use tokio_util::sync::CancellationToken;

use support::{eventually, settings, Inbox, QUEUE};

// =============================================================================
// Producer -> outbox -> worker -> bus -> handler
// =============================================================================

#[tokio::test]
async fn produced_events_reach_the_handler_in_session_order() {
    let messaging = Messaging::in_memory(settings()).unwrap();
    let cancel = CancellationToken::new();
    let inbox = Inbox::default();
    let subscription = messaging.subscribe(inbox.clone(), inbox.clone(), &cancel);
    let worker = messaging.spawn_worker(&cancel);

    let sender = messaging.sender();
    sender
        .send(
            vec![
                MessageEnvelope::for_subject(AccountCreatedEvent::new("a", Utc::now())),
                MessageEnvelope::for_subject(DependentAddedEvent::new("b", "b-1")),
                MessageEnvelope::for_subject(DependentAddedEvent::new("a", "a-1")),
            ],
            &cancel,
        )
        .await
        .unwrap();
    sender
        .send(
            vec![
                MessageEnvelope::for_subject(DependentRemovedEvent::new("a", "a-1")),
                MessageEnvelope::for_subject(DependentRemovedEvent::new("b", "b-1")),
            ],
            &cancel,
        )
        .await
        .unwrap();

    eventually(|| inbox.received().len() == 5).await;

    let a: Vec<&'static str> = inbox.received_for("a").iter().map(DomainEvent::type_name).collect();
    assert_eq!(
        a,
        vec!["AccountCreatedEvent", "DependentAddedEvent", "DependentRemovedEvent"]
    );
    assert_eq!(
        inbox.received_for("b"),
        vec![
            DomainEvent::DependentAdded(DependentAddedEvent::new("b", "b-1")),
            DomainEvent::DependentRemoved(DependentRemovedEvent::new("b", "b-1")),
        ]
    );
    assert!(inbox.rejected().is_empty());

    let stats = worker.stop().await;
    subscription.stop().await;

    assert_eq!(stats.items_dispatched, 5);
    assert_eq!(stats.failures, 0);
    assert!(messaging.store().queue().is_empty());
    assert_eq!(messaging.bus().transport().completed(QUEUE).len(), 5);
}

// =============================================================================
// Session blocking
// =============================================================================

#[tokio::test]
async fn blocked_session_is_skipped_until_unlocked() {
    let messaging = Messaging::in_memory(settings()).unwrap();
    let transport = messaging.bus().transport().clone();
    let cancel = CancellationToken::new();
    let inbox = Inbox::default();

    transport
        .set_session_state(QUEUE, "456", Some(SessionState::blocked().to_bytes().unwrap()))
        .unwrap();
    let subscription = messaging.subscribe(inbox.clone(), inbox.clone(), &cancel);

    messaging
        .bus()
        .send(
            vec![MessageEnvelope::for_subject(AccountClosedEvent::new("456", Utc::now()))],
            &cancel,
        )
        .await
        .unwrap();
    eventually(|| transport.dead_letters(QUEUE).len() == 1).await;

    assert!(inbox.received().is_empty());
    assert_eq!(inbox.rejected(), vec!["SessionBlocked"]);

    transport.deliver(QUEUE, WireMessage::unlock("456")).unwrap();
    eventually(|| transport.session_state(QUEUE, "456").is_none()).await;

    messaging
        .bus()
        .send(
            vec![MessageEnvelope::for_subject(AccountClosedEvent::new("456", Utc::now()))],
            &cancel,
        )
        .await
        .unwrap();
    eventually(|| inbox.received().len() == 1).await;

    assert_eq!(inbox.rejected(), vec!["SessionBlocked"]);
    subscription.stop().await;
}

#[tokio::test]
async fn malformed_messages_go_to_the_error_handler() {
    let messaging = Messaging::in_memory(settings()).unwrap();
    let transport = messaging.bus().transport().clone();
    let cancel = CancellationToken::new();
    let inbox = Inbox::default();
    let subscription = messaging.subscribe(inbox.clone(), inbox.clone(), &cancel);

    transport
        .deliver(QUEUE, WireMessage::new("s-1", b"{}".to_vec()))
        .unwrap();
    transport
        .deliver(
            QUEUE,
            WireMessage::new("s-1", Vec::new())
                .with_property(TYPE_PROPERTY, "AccountClosedEvent")
                .with_property(QUALIFIED_TYPE_PROPERTY, "outbox_dispatch.events.AccountClosedEvent"),
        )
        .unwrap();
    transport
        .deliver(
            QUEUE,
            WireMessage::new("s-1", b"{}".to_vec()).with_property(TYPE_PROPERTY, "ParcelShipped"),
        )
        .unwrap();

    eventually(|| transport.dead_letters(QUEUE).len() == 3).await;

    assert!(inbox.received().is_empty());
    assert_eq!(
        inbox.rejected(),
        vec!["MissingType", "EmptyMessage", "UnsupportedType"]
    );
    // one poisoned message does not stall the session by default
    assert_eq!(transport.session_state(QUEUE, "s-1"), None);
    subscription.stop().await;
}

#[tokio::test]
async fn rejection_blocks_the_session_when_configured() {
    let mut settings = settings();
    settings.session.block_session_on_failure = true;
    let messaging = Messaging::in_memory(settings).unwrap();
    let transport = messaging.bus().transport().clone();
    let cancel = CancellationToken::new();
    let inbox = Inbox::default();
    let subscription = messaging.subscribe(inbox.clone(), inbox.clone(), &cancel);

    transport
        .deliver(QUEUE, WireMessage::new("s-2", b"{}".to_vec()))
        .unwrap();
    eventually(|| transport.session_state(QUEUE, "s-2").is_some()).await;

    messaging
        .bus()
        .send(
            vec![MessageEnvelope::new(
                DependentAddedEvent::new("s-2", "x"),
                "s-2",
            )],
            &cancel,
        )
        .await
        .unwrap();
    eventually(|| transport.dead_letters(QUEUE).len() == 2).await;

    assert!(inbox.received().is_empty());
    assert_eq!(inbox.rejected(), vec!["MissingType", "SessionBlocked"]);
    subscription.stop().await;
}
