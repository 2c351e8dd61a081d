use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::{DeliveryChannel, DeliveryStatus};

/// One row of `notification_delivery_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub notification_id: i64,
    pub channel: DeliveryChannel,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub message_id: Option<Uuid>,
}

impl DeliveryLogEntry {
    pub fn delivered(notification_id: i64, channel: DeliveryChannel) -> Self {
        Self {
            notification_id,
            channel,
            status: DeliveryStatus::Delivered,
            delivered_at: Some(Utc::now()),
            error_message: None,
            message_id: None,
        }
    }

    pub fn failed(notification_id: i64, channel: DeliveryChannel, error: String) -> Self {
        Self {
            notification_id,
            channel,
            status: DeliveryStatus::Failed,
            delivered_at: None,
            error_message: Some(error),
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: Option<Uuid>) -> Self {
        self.message_id = message_id;
        self
    }
}

/// A delivery outcome recorded before its notification row exists.
///
/// Parked under the envelope's `message_id` and moved into the delivery log
/// once the in-app worker persists the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub message_id: Uuid,
    pub channel: DeliveryChannel,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PendingDelivery {
    pub fn new(message_id: Uuid, channel: DeliveryChannel, error: Option<&str>) -> Self {
        let (status, delivered_at) = match error {
            None => (DeliveryStatus::Delivered, Some(Utc::now())),
            Some(_) => (DeliveryStatus::Failed, None),
        };

        Self {
            message_id,
            channel,
            status,
            delivered_at,
            error_message: error.map(str::to_string),
        }
    }

    pub fn attach(self, notification_id: i64) -> DeliveryLogEntry {
        DeliveryLogEntry {
            notification_id,
            channel: self.channel,
            status: self.status,
            delivered_at: self.delivered_at,
            error_message: self.error_message,
            message_id: Some(self.message_id),
        }
    }
}
