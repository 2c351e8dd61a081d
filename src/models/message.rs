use serde::{Deserialize, Serialize};

/// Body published to the dead-letter queue.
///
/// `payload` is the original message body, lossily decoded as UTF-8 so that
/// malformed bytes still reach the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub queue: String,
    pub payload: String,
    pub failure_reason: String,
    pub retry_count: u32,
    pub failed_at: String,
}
