//! In-memory collaborators shared by the integration tests.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use notification_pipeline::{
    broker::{Publisher, rabbitmq::PublishOptions, topology::QueueKind},
    clients::{
        database::NotificationStore,
        email::{EmailProvider, OutgoingEmail},
        redis::SendLedger,
    },
    models::{
        delivery::{DeliveryLogEntry, PendingDelivery},
        notification::{PersistedNotification, QueueEnvelope},
        status::{DeliveryChannel, IdempotencyStatus},
    },
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Store with the same conflict rules as the SQL schema: notifications are
/// unique on a non-null `message_id`, delivery-log rows on
/// `(notification_id, channel, message_id)` when `message_id` is set.
#[derive(Default)]
pub struct MemoryStore {
    notifications: Mutex<Vec<(Option<Uuid>, PersistedNotification)>>,
    delivery_log: Mutex<Vec<DeliveryLogEntry>>,
    pending: Mutex<Vec<PendingDelivery>>,
    emails: Mutex<HashMap<i64, String>>,
    failing_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: i64, email: &str) -> Self {
        self.emails.lock().insert(user_id, email.to_string());
        self
    }

    /// The next `count` notification inserts fail.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<PersistedNotification> {
        self.notifications
            .lock()
            .iter()
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn delivery_log(&self) -> Vec<DeliveryLogEntry> {
        self.delivery_log.lock().clone()
    }

    pub fn pending_deliveries(&self) -> Vec<PendingDelivery> {
        self.pending.lock().clone()
    }

    fn append_log(&self, entry: DeliveryLogEntry) -> bool {
        let mut log = self.delivery_log.lock();

        let duplicate = entry.message_id.is_some()
            && log.iter().any(|e| {
                e.notification_id == entry.notification_id
                    && e.channel == entry.channel
                    && e.message_id == entry.message_id
            });

        if !duplicate {
            log.push(entry);
        }

        !duplicate
    }

    pub fn log_for(&self, channel: DeliveryChannel) -> Vec<DeliveryLogEntry> {
        self.delivery_log
            .lock()
            .iter()
            .filter(|e| e.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(
        &self,
        envelope: &QueueEnvelope,
    ) -> Result<PersistedNotification, Error> {
        if self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("Database write failed: connection refused"));
        }

        let mut rows = self.notifications.lock();

        if let Some(message_id) = envelope.message_id {
            if let Some((_, existing)) = rows.iter().find(|(id, _)| *id == Some(message_id)) {
                return Ok(existing.clone());
            }
        }

        let notification = PersistedNotification {
            id: rows.len() as i64 + 1,
            user_id: envelope.user_id,
            notification_type: envelope.notification_type.clone(),
            title: envelope.title.clone(),
            message: envelope.message.clone(),
            priority: envelope.priority,
            data: envelope.data.clone(),
            created_at: Utc::now(),
            is_read: false,
        };

        rows.push((envelope.message_id, notification.clone()));

        Ok(notification)
    }

    async fn insert_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<(), Error> {
        self.append_log(entry.clone());
        Ok(())
    }

    async fn defer_delivery_log(&self, pending: &PendingDelivery) -> Result<(), Error> {
        let mut parked = self.pending.lock();

        let duplicate = parked
            .iter()
            .any(|p| p.message_id == pending.message_id && p.channel == pending.channel);

        if !duplicate {
            parked.push(pending.clone());
        }

        Ok(())
    }

    async fn attach_pending_deliveries(
        &self,
        notification_id: i64,
        message_id: Uuid,
    ) -> Result<u64, Error> {
        let moved: Vec<PendingDelivery> = {
            let mut parked = self.pending.lock();
            let (matching, rest) = std::mem::take(&mut *parked)
                .into_iter()
                .partition(|p| p.message_id == message_id);
            *parked = rest;
            matching
        };

        Ok(moved
            .into_iter()
            .filter(|p| self.append_log(p.clone().attach(notification_id)))
            .count() as u64)
    }

    async fn lookup_email(&self, user_id: i64) -> Result<Option<String>, Error> {
        Ok(self.emails.lock().get(&user_id).cloned())
    }

    async fn find_recent_by_user_type_title(
        &self,
        user_id: i64,
        notification_type: &str,
        title: &str,
    ) -> Result<Option<i64>, Error> {
        Ok(self
            .notifications
            .lock()
            .iter()
            .rev()
            .map(|(_, n)| n)
            .find(|n| {
                n.user_id == user_id && n.notification_type == notification_type && n.title == title
            })
            .map(|n| n.id))
    }

    async fn find_by_message_id(&self, message_id: Uuid) -> Result<Option<i64>, Error> {
        Ok(self
            .notifications
            .lock()
            .iter()
            .find(|(id, _)| *id == Some(message_id))
            .map(|(_, n)| n.id))
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub queue: QueueKind,
    pub payload: Vec<u8>,
    pub options: PublishOptions,
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    failing: AtomicUsize,
    unavailable: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn queues(&self) -> Vec<QueueKind> {
        self.published.lock().iter().map(|p| p.queue).collect()
    }

    pub fn payloads_for(&self, queue: QueueKind) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.queue == queue)
            .map(|p| p.payload.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        queue: QueueKind,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("Failed to connect to RabbitMQ: connection refused"));
        }

        if self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("Publish to {} was not confirmed", queue));
        }

        self.published.lock().push(Published {
            queue,
            payload,
            options,
        });

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("Failed to connect to RabbitMQ: connection refused"));
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEmailProvider {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing_recipients: Mutex<HashSet<String>>,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl FakeEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(self, recipient: &str) -> Self {
        self.failing_recipients.lock().insert(recipient.to_string());
        self
    }

    /// Makes the next send block until [`FakeEmailProvider::open_gate`].
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub async fn wait_until_sending(&self) {
        self.entered.notified().await;
    }

    pub fn open_gate(&self) {
        self.release.notify_one();
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailProvider for FakeEmailProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), Error> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }

        if self.failing_recipients.lock().contains(&email.to) {
            return Err(anyhow!("SendGrid error (500 Internal Server Error): mailbox unavailable"));
        }

        self.sent.lock().push(email.clone());

        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<Uuid, IdempotencyStatus>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, message_id: Uuid) -> IdempotencyStatus {
        self.entries
            .lock()
            .get(&message_id)
            .cloned()
            .unwrap_or(IdempotencyStatus::NotFound)
    }
}

#[async_trait]
impl SendLedger for MemoryLedger {
    async fn check(&self, message_id: Uuid) -> Result<IdempotencyStatus, Error> {
        Ok(self.status(message_id))
    }

    async fn mark_as_processing(&self, message_id: Uuid) -> Result<(), Error> {
        self.entries
            .lock()
            .insert(message_id, IdempotencyStatus::Processing);
        Ok(())
    }

    async fn mark_as_sent(&self, message_id: Uuid) -> Result<(), Error> {
        self.entries.lock().insert(message_id, IdempotencyStatus::Sent);
        Ok(())
    }

    async fn mark_as_failed(&self, message_id: Uuid) -> Result<(), Error> {
        self.entries.lock().insert(message_id, IdempotencyStatus::Failed);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
