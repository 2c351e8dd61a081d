use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Priority tier requested by the producer. Strings other than
/// `low`/`medium`/`high` are kept as `Unknown` instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    #[serde(other)]
    Unknown,
}

impl Priority {
    /// Broker priority hint (`x-max-priority` is 10 on the priority queues).
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 5,
            Priority::High => 10,
            Priority::Unknown => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Unknown => "unknown",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "low" => Priority::Low,
            "medium" => Priority::Medium,
            "high" => Priority::High,
            _ => Priority::Unknown,
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery channels a user can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[serde(rename = "inapp")]
    InApp,
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "empty_object")]
    pub data: JsonValue,
}

impl NotificationIntent {
    pub fn new(user_id: i64, notification_type: &str, title: &str, priority: Priority) -> Self {
        Self {
            user_id,
            notification_type: notification_type.to_string(),
            title: title.to_string(),
            message: None,
            priority,
            data: empty_object(),
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }
}

/// Wire form of a routed notification.
///
/// `message_id` is shared by every envelope published for the same intent and
/// serves as the idempotency key downstream. Producers that predate it simply
/// omit the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "empty_object")]
    pub data: JsonValue,
    #[serde(rename = "timestamp")]
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEnvelope {
    pub fn from_intent(intent: &NotificationIntent, message_id: Uuid, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            message_id: Some(message_id),
            user_id: intent.user_id,
            notification_type: intent.notification_type.clone(),
            title: intent.title.clone(),
            message: intent.message.clone(),
            priority: intent.priority,
            data: intent.data.clone(),
            enqueued_at,
        }
    }
}

/// Row of the `notifications` table, also the fan-out payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNotification {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: Option<String>,
    pub priority: Priority,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

pub fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

pub fn room_for(user_id: i64) -> String {
    format!("user_{}", user_id)
}
