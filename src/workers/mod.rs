//! Queue consumers. Each worker is a [`MessageHandler`] driven by
//! [`consumer::run_consumer`]; the aggregators additionally own a flush timer.

pub mod aggregator;
pub mod consumer;
pub mod immediate;
pub mod inapp;
pub mod monitor;
pub mod push;

use std::{str::FromStr, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    broker::topology::QueueKind,
    clients::database::NotificationStore,
    models::{
        delivery::{DeliveryLogEntry, PendingDelivery},
        notification::QueueEnvelope,
        status::DeliveryChannel,
    },
    utils::bounded,
};

/// What the consumer loop should do with a delivery once handled.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Ack,
    /// Transient failure; redeliver until the retry threshold is reached.
    Retry(String),
    /// Will never succeed; park it on the dead-letter queue.
    DeadLetter(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> HandleOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    InApp,
    ImmediateEmail,
    BatchEmail,
    DigestEmail,
    Push,
}

impl WorkerKind {
    pub fn queue(&self) -> QueueKind {
        match self {
            WorkerKind::InApp => QueueKind::InApp,
            WorkerKind::ImmediateEmail => QueueKind::ImmediateEmail,
            WorkerKind::BatchEmail => QueueKind::BatchEmail,
            WorkerKind::DigestEmail => QueueKind::DigestEmail,
            WorkerKind::Push => QueueKind::Fanout,
        }
    }

    /// Broker-side credit. In-app and immediate email process one message at a time.
    pub fn prefetch(&self) -> Option<u16> {
        match self {
            WorkerKind::InApp | WorkerKind::ImmediateEmail => Some(1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::InApp => "inapp",
            WorkerKind::ImmediateEmail => "email",
            WorkerKind::BatchEmail => "batch",
            WorkerKind::DigestEmail => "digest",
            WorkerKind::Push => "push",
        }
    }
}

impl FromStr for WorkerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inapp" => Ok(WorkerKind::InApp),
            "email" => Ok(WorkerKind::ImmediateEmail),
            "batch" => Ok(WorkerKind::BatchEmail),
            "digest" => Ok(WorkerKind::DigestEmail),
            "push" => Ok(WorkerKind::Push),
            other => Err(anyhow!("Unknown worker '{}'", other)),
        }
    }
}

/// Resolves the persisted notification a delivery belongs to.
///
/// Envelopes carrying a `message_id` are matched exactly; legacy envelopes
/// fall back to the most recent row with the same user, type and title.
pub async fn correlate(
    store: &dyn NotificationStore,
    envelope: &QueueEnvelope,
    limit: Duration,
) -> Result<Option<i64>, Error> {
    match envelope.message_id {
        Some(message_id) => {
            bounded(limit, "find_by_message_id", store.find_by_message_id(message_id)).await
        }
        None => {
            bounded(
                limit,
                "find_recent_by_user_type_title",
                store.find_recent_by_user_type_title(
                    envelope.user_id,
                    &envelope.notification_type,
                    &envelope.title,
                ),
            )
            .await
        }
    }
}

/// Writes the delivery-log row for one envelope. Audit-trail failures are
/// logged and swallowed; returns whether the outcome was recorded.
///
/// An envelope whose notification is not persisted yet has its outcome parked
/// under its `message_id` until the in-app worker attaches it.
pub async fn record_delivery(
    store: &dyn NotificationStore,
    envelope: &QueueEnvelope,
    channel: DeliveryChannel,
    error: Option<&str>,
    limit: Duration,
) -> bool {
    let notification_id = match correlate(store, envelope, limit).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            if let Some(message_id) = envelope.message_id {
                return defer_delivery(store, message_id, channel, error, limit).await;
            }

            debug!(
                user_id = envelope.user_id,
                channel = %channel,
                "No persisted notification to correlate, skipping delivery log"
            );
            return false;
        }
        Err(e) => {
            warn!(error = %e, channel = %channel, "Failed to correlate delivery");
            return false;
        }
    };

    let entry = match error {
        None => DeliveryLogEntry::delivered(notification_id, channel),
        Some(reason) => DeliveryLogEntry::failed(notification_id, channel, reason.to_string()),
    }
    .with_message_id(envelope.message_id);

    match bounded(limit, "insert_delivery_log", store.insert_delivery_log(&entry)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, notification_id, channel = %channel, "Failed to write delivery log");
            false
        }
    }
}

async fn defer_delivery(
    store: &dyn NotificationStore,
    message_id: Uuid,
    channel: DeliveryChannel,
    error: Option<&str>,
    limit: Duration,
) -> bool {
    let pending = PendingDelivery::new(message_id, channel, error);

    if let Err(e) = bounded(limit, "defer_delivery_log", store.defer_delivery_log(&pending)).await {
        warn!(error = %e, message_id = %message_id, channel = %channel, "Failed to defer delivery log");
        return false;
    }

    debug!(
        message_id = %message_id,
        channel = %channel,
        "Notification not persisted yet, delivery log deferred"
    );

    // The in-app row may have landed between the lookup and the deferral.
    if let Ok(Some(notification_id)) =
        bounded(limit, "find_by_message_id", store.find_by_message_id(message_id)).await
    {
        if let Err(e) = attach_pending(store, notification_id, message_id, limit).await {
            warn!(error = %e, notification_id, "Failed to attach deferred delivery log");
        }
    }

    true
}

/// Moves outcomes parked for `message_id` onto the persisted notification.
pub async fn attach_pending(
    store: &dyn NotificationStore,
    notification_id: i64,
    message_id: Uuid,
    limit: Duration,
) -> Result<u64, Error> {
    let attached = bounded(
        limit,
        "attach_pending_deliveries",
        store.attach_pending_deliveries(notification_id, message_id),
    )
    .await?;

    if attached > 0 {
        debug!(notification_id, attached, "Deferred delivery log rows attached");
    }

    Ok(attached)
}

pub fn decode_envelope(payload: &[u8]) -> Result<QueueEnvelope, HandleOutcome> {
    serde_json::from_slice::<QueueEnvelope>(payload).map_err(|e| {
        warn!(error = %e, "Malformed queue envelope");
        HandleOutcome::DeadLetter(format!("Malformed envelope: {}", e))
    })
}
