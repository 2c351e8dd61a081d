use thiserror::Error;

/// Errors surfaced to callers of the router.
///
/// Downstream delivery failures never appear here; they are only visible in
/// the delivery log.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid notification intent: {0}")]
    InvalidIntent(&'static str),

    #[error("Message broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Failed to encode queue envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}
