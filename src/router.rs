use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    broker::{Publisher, rabbitmq::PublishOptions, topology::QueueKind},
    error::DispatchError,
    models::notification::{Channel, NotificationIntent, Priority, QueueEnvelope},
};

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Published to the listed queues, in publish order.
    Published {
        message_id: Uuid,
        queues: Vec<QueueKind>,
    },
    /// No channel enabled; nothing was published.
    Skipped,
}

/// Email tier for a priority. Unknown priorities go to the batch tier.
pub fn email_queue_for(priority: Priority) -> QueueKind {
    match priority {
        Priority::High => QueueKind::ImmediateEmail,
        Priority::Medium => QueueKind::BatchEmail,
        Priority::Low => QueueKind::DigestEmail,
        Priority::Unknown => QueueKind::BatchEmail,
    }
}

pub struct NotificationRouter {
    publisher: Arc<dyn Publisher>,
}

impl NotificationRouter {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    pub async fn route(
        &self,
        intent: &NotificationIntent,
        channels: &[Channel],
    ) -> Result<RouteOutcome, DispatchError> {
        validate(intent)?;

        let inapp = channels.contains(&Channel::InApp);
        let email = channels.contains(&Channel::Email);

        if !inapp && !email {
            debug!(user_id = intent.user_id, "No channels enabled, skipping");
            return Ok(RouteOutcome::Skipped);
        }

        let message_id = Uuid::new_v4();
        let envelope = QueueEnvelope::from_intent(intent, message_id, Utc::now());
        let payload = serde_json::to_vec(&envelope)?;
        let options = PublishOptions::with_priority(intent.priority.weight());

        let mut queues = Vec::with_capacity(2);
        if inapp {
            queues.push(QueueKind::InApp);
        }
        if email {
            queues.push(email_queue_for(intent.priority));
        }

        for queue in &queues {
            self.publisher
                .publish(*queue, payload.clone(), options)
                .await
                .map_err(|e| {
                    warn!(
                        queue = %queue,
                        message_id = %message_id,
                        error = %e,
                        "Queue publish failed"
                    );
                    DispatchError::BrokerUnavailable(e.to_string())
                })?;

            info!(
                queue = %queue,
                message_id = %message_id,
                user_id = intent.user_id,
                priority = %intent.priority,
                "Notification published"
            );
        }

        Ok(RouteOutcome::Published { message_id, queues })
    }
}

fn validate(intent: &NotificationIntent) -> Result<(), DispatchError> {
    if intent.user_id <= 0 {
        return Err(DispatchError::InvalidIntent("userId is required"));
    }
    if intent.notification_type.trim().is_empty() {
        return Err(DispatchError::InvalidIntent("type is required"));
    }
    if intent.title.trim().is_empty() {
        return Err(DispatchError::InvalidIntent("title is required"));
    }

    Ok(())
}
