use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    models::notification::room_for,
    realtime::RealtimeTransport,
    workers::{HandleOutcome, MessageHandler},
};

pub const NEW_NOTIFICATION_EVENT: &str = "notification:new";

/// Forwards persisted notifications from the fan-out queue to the
/// recipient's realtime room.
pub struct PushGateway {
    transport: Arc<dyn RealtimeTransport>,
}

impl PushGateway {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self { transport }
    }
}

fn recipient(payload: &JsonValue) -> Option<i64> {
    let value = payload.get("user_id").or_else(|| payload.get("userId"))?;

    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl MessageHandler for PushGateway {
    async fn handle(&self, payload: &[u8]) -> HandleOutcome {
        let notification: JsonValue = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Malformed fan-out payload");
                return HandleOutcome::DeadLetter(format!("Malformed fan-out payload: {}", e));
            }
        };

        let Some(user_id) = recipient(&notification) else {
            warn!("Fan-out payload has no user id");
            return HandleOutcome::DeadLetter("Fan-out payload has no user id".to_string());
        };

        let room = room_for(user_id);
        let sessions = self
            .transport
            .emit_to_room(&room, NEW_NOTIFICATION_EVENT, &notification);

        debug!(user_id, room = %room, sessions, "Notification pushed");

        HandleOutcome::Ack
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_recipient_accepts_numbers_and_numeric_strings() {
        assert_eq!(recipient(&json!({"user_id": 4})), Some(4));
        assert_eq!(recipient(&json!({"user_id": "12"})), Some(12));
        assert_eq!(recipient(&json!({"userId": 7})), Some(7));
    }

    #[test]
    fn test_recipient_missing_or_invalid() {
        assert_eq!(recipient(&json!({"id": 4})), None);
        assert_eq!(recipient(&json!({"user_id": "abc"})), None);
        assert_eq!(recipient(&json!([1, 2])), None);
    }
}
