use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    broker::{Publisher, rabbitmq::PublishOptions, topology::QueueKind},
    clients::database::NotificationStore,
    models::{
        delivery::DeliveryLogEntry,
        notification::{PersistedNotification, QueueEnvelope},
        status::DeliveryChannel,
    },
    utils::bounded,
    workers::{HandleOutcome, MessageHandler, attach_pending, decode_envelope},
};

/// Persists in-app notifications and hands them to the push gateway.
pub struct InAppWorker {
    store: Arc<dyn NotificationStore>,
    publisher: Arc<dyn Publisher>,
    timeout: Duration,
}

impl InAppWorker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        publisher: Arc<dyn Publisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            timeout,
        }
    }

    async fn deliver(&self, envelope: &QueueEnvelope) -> Result<PersistedNotification, Error> {
        let notification = bounded(
            self.timeout,
            "insert_notification",
            self.store.insert_notification(envelope),
        )
        .await?;

        debug!(
            notification_id = notification.id,
            user_id = notification.user_id,
            "Notification persisted"
        );

        let entry = DeliveryLogEntry::delivered(notification.id, DeliveryChannel::InApp)
            .with_message_id(envelope.message_id);

        bounded(
            self.timeout,
            "insert_delivery_log",
            self.store.insert_delivery_log(&entry),
        )
        .await?;

        if let Some(message_id) = envelope.message_id {
            attach_pending(self.store.as_ref(), notification.id, message_id, self.timeout).await?;
        }

        let payload = serde_json::to_vec(&notification)
            .map_err(|e| anyhow!("Failed to serialize persisted notification: {}", e))?;

        bounded(
            self.timeout,
            "publish_fanout",
            self.publisher
                .publish(QueueKind::Fanout, payload, PublishOptions::default()),
        )
        .await?;

        Ok(notification)
    }
}

#[async_trait]
impl MessageHandler for InAppWorker {
    async fn handle(&self, payload: &[u8]) -> HandleOutcome {
        let envelope = match decode_envelope(payload) {
            Ok(envelope) => envelope,
            Err(outcome) => return outcome,
        };

        match self.deliver(&envelope).await {
            Ok(notification) => {
                info!(
                    notification_id = notification.id,
                    user_id = notification.user_id,
                    message_id = ?envelope.message_id,
                    "In-app notification delivered"
                );
                HandleOutcome::Ack
            }
            Err(e) => {
                warn!(
                    user_id = envelope.user_id,
                    message_id = ?envelope.message_id,
                    error = %e,
                    "In-app delivery failed, scheduling retry"
                );
                HandleOutcome::Retry(e.to_string())
            }
        }
    }
}
