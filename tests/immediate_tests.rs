use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use notification_pipeline::{
    clients::database::NotificationStore,
    models::{
        notification::{NotificationIntent, Priority, QueueEnvelope},
        status::{DeliveryChannel, DeliveryStatus, IdempotencyStatus},
    },
    templates::EmailTemplates,
    workers::{
        HandleOutcome, MessageHandler, immediate::ImmediateEmailWorker, inapp::InAppWorker,
    },
};
use uuid::Uuid;

use crate::support::{FakeEmailProvider, MemoryLedger, MemoryStore, RecordingPublisher};

const TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    store: Arc<MemoryStore>,
    email: Arc<FakeEmailProvider>,
    ledger: Arc<MemoryLedger>,
    worker: ImmediateEmailWorker,
}

fn harness(store: MemoryStore, email: FakeEmailProvider) -> Result<Harness> {
    let store = Arc::new(store);
    let email = Arc::new(email);
    let ledger = Arc::new(MemoryLedger::new());
    let worker = ImmediateEmailWorker::new(
        store.clone(),
        email.clone(),
        ledger.clone(),
        Arc::new(EmailTemplates::new()?),
        TIMEOUT,
    );

    Ok(Harness {
        store,
        email,
        ledger,
        worker,
    })
}

fn high_priority(user_id: i64) -> QueueEnvelope {
    let intent = NotificationIntent::new(user_id, "mention", "You were mentioned", Priority::High)
        .with_message("Alex mentioned you in a comment");
    QueueEnvelope::from_intent(&intent, Uuid::new_v4(), Utc::now())
}

/// Test: A high-priority envelope is emailed and logged as delivered
#[tokio::test]
async fn test_immediate_email_sent_and_logged() -> Result<()> {
    let h = harness(
        MemoryStore::new().with_user(2, "sam@example.com"),
        FakeEmailProvider::new(),
    )?;
    let envelope = high_priority(2);
    let persisted = h.store.insert_notification(&envelope).await?;

    let outcome = h.worker.handle(&serde_json::to_vec(&envelope)?).await;

    assert_eq!(outcome, HandleOutcome::Ack);

    let sent = h.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "sam@example.com");
    assert_eq!(sent[0].subject, "🔔 You were mentioned");
    assert!(sent[0].html.contains("High Priority"));

    let log = h.store.log_for(DeliveryChannel::Email);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].notification_id, persisted.id);
    assert_eq!(log[0].status, DeliveryStatus::Delivered);

    let message_id = envelope.message_id.expect("router always stamps a message id");
    assert_eq!(h.ledger.status(message_id), IdempotencyStatus::Sent);

    Ok(())
}

/// Test: A redelivered envelope already marked sent is not emailed twice
#[tokio::test]
async fn test_redelivery_after_send_is_skipped() -> Result<()> {
    let h = harness(
        MemoryStore::new().with_user(2, "sam@example.com"),
        FakeEmailProvider::new(),
    )?;
    let envelope = high_priority(2);
    h.store.insert_notification(&envelope).await?;
    let payload = serde_json::to_vec(&envelope)?;

    assert_eq!(h.worker.handle(&payload).await, HandleOutcome::Ack);
    assert_eq!(h.worker.handle(&payload).await, HandleOutcome::Ack);

    assert_eq!(h.email.sent().len(), 1);
    assert_eq!(h.store.log_for(DeliveryChannel::Email).len(), 1);

    Ok(())
}

/// Test: A failed send is logged as failed and still acknowledged
#[tokio::test]
async fn test_failed_send_is_logged_and_not_retried() -> Result<()> {
    let h = harness(
        MemoryStore::new().with_user(2, "sam@example.com"),
        FakeEmailProvider::new().failing_for("sam@example.com"),
    )?;
    let envelope = high_priority(2);
    h.store.insert_notification(&envelope).await?;

    let outcome = h.worker.handle(&serde_json::to_vec(&envelope)?).await;

    assert_eq!(outcome, HandleOutcome::Ack);
    assert!(h.email.sent().is_empty());

    let log = h.store.log_for(DeliveryChannel::Email);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, DeliveryStatus::Failed);
    assert!(log[0].delivered_at.is_none());
    assert!(
        log[0]
            .error_message
            .as_deref()
            .is_some_and(|e| e.contains("mailbox unavailable"))
    );

    let message_id = envelope.message_id.expect("router always stamps a message id");
    assert_eq!(h.ledger.status(message_id), IdempotencyStatus::Failed);

    Ok(())
}

/// Test: A failed send handled before the in-app persist is still audited
#[tokio::test]
async fn test_failed_send_before_inapp_persist_is_logged_once_persisted() -> Result<()> {
    let h = harness(
        MemoryStore::new().with_user(2, "sam@example.com"),
        FakeEmailProvider::new().failing_for("sam@example.com"),
    )?;
    let inapp = InAppWorker::new(h.store.clone(), Arc::new(RecordingPublisher::new()), TIMEOUT);
    let envelope = high_priority(2);
    let payload = serde_json::to_vec(&envelope)?;

    assert_eq!(h.worker.handle(&payload).await, HandleOutcome::Ack);

    assert!(h.store.log_for(DeliveryChannel::Email).is_empty());
    assert_eq!(h.store.pending_deliveries().len(), 1);

    assert_eq!(inapp.handle(&payload).await, HandleOutcome::Ack);

    let persisted = h.store.notifications();
    let log = h.store.log_for(DeliveryChannel::Email);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].notification_id, persisted[0].id);
    assert_eq!(log[0].status, DeliveryStatus::Failed);
    assert_eq!(log[0].message_id, envelope.message_id);
    assert!(
        log[0]
            .error_message
            .as_deref()
            .is_some_and(|e| e.contains("mailbox unavailable"))
    );
    assert!(h.store.pending_deliveries().is_empty());

    Ok(())
}

/// Test: A redelivered in-app message does not attach the deferred row twice
#[tokio::test]
async fn test_deferred_delivery_attached_once_across_redelivery() -> Result<()> {
    let h = harness(
        MemoryStore::new().with_user(2, "sam@example.com"),
        FakeEmailProvider::new(),
    )?;
    let inapp = InAppWorker::new(h.store.clone(), Arc::new(RecordingPublisher::new()), TIMEOUT);
    let payload = serde_json::to_vec(&high_priority(2))?;

    assert_eq!(h.worker.handle(&payload).await, HandleOutcome::Ack);
    assert_eq!(inapp.handle(&payload).await, HandleOutcome::Ack);
    assert_eq!(inapp.handle(&payload).await, HandleOutcome::Ack);

    let log = h.store.log_for(DeliveryChannel::Email);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, DeliveryStatus::Delivered);
    assert_eq!(h.store.log_for(DeliveryChannel::InApp).len(), 1);

    Ok(())
}

/// Test: A user without an email address is skipped without a log row
#[tokio::test]
async fn test_lookup_miss_skips_without_log() -> Result<()> {
    let h = harness(MemoryStore::new(), FakeEmailProvider::new())?;
    let envelope = high_priority(99);
    h.store.insert_notification(&envelope).await?;

    let outcome = h.worker.handle(&serde_json::to_vec(&envelope)?).await;

    assert_eq!(outcome, HandleOutcome::Ack);
    assert!(h.email.sent().is_empty());
    assert!(h.store.delivery_log().is_empty());

    Ok(())
}

/// Test: Legacy envelopes correlate to the newest matching notification
#[tokio::test]
async fn test_legacy_envelope_correlates_by_user_type_title() -> Result<()> {
    let h = harness(
        MemoryStore::new().with_user(2, "sam@example.com"),
        FakeEmailProvider::new(),
    )?;
    let mut envelope = high_priority(2);
    envelope.message_id = None;
    h.store.insert_notification(&envelope).await?;
    let newest = h.store.insert_notification(&envelope).await?;

    let outcome = h.worker.handle(&serde_json::to_vec(&envelope)?).await;

    assert_eq!(outcome, HandleOutcome::Ack);
    assert_eq!(h.email.sent().len(), 1);

    let log = h.store.log_for(DeliveryChannel::Email);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].notification_id, newest.id);
    assert_eq!(log[0].message_id, None);

    Ok(())
}

/// Test: Malformed payloads are dead-lettered without sending
#[tokio::test]
async fn test_malformed_payload_is_dead_lettered() -> Result<()> {
    let h = harness(MemoryStore::new(), FakeEmailProvider::new())?;

    let outcome = h.worker.handle(b"[]").await;

    assert!(matches!(outcome, HandleOutcome::DeadLetter(_)));
    assert!(h.email.sent().is_empty());

    Ok(())
}
