use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::{retry::RetryConfig, status::IdempotencyStatus},
    utils::retry_with_backoff,
};

/// Remembers which messages have already produced an outbound send.
#[async_trait]
pub trait SendLedger: Send + Sync {
    async fn check(&self, message_id: Uuid) -> Result<IdempotencyStatus, Error>;
    async fn mark_as_processing(&self, message_id: Uuid) -> Result<(), Error>;
    async fn mark_as_sent(&self, message_id: Uuid) -> Result<(), Error>;
    async fn mark_as_failed(&self, message_id: Uuid) -> Result<(), Error>;
    async fn health_check(&self) -> Result<(), Error>;
}

pub struct RedisLedger {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
    retry_config: RetryConfig,
}

fn key_for(message_id: Uuid) -> String {
    format!("idempotency:email:{}", message_id)
}

impl RedisLedger {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
            retry_config: config.retry_config(),
        })
    }

    async fn set_status(&self, message_id: Uuid, status: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();

        conn.set_ex::<_, _, ()>(key_for(message_id), status, self.idempotency_ttl_seconds)
            .await
            .map_err(|e| anyhow!("Failed to mark message as {}: {}", status, e))
    }
}

#[async_trait]
impl SendLedger for RedisLedger {
    async fn check(&self, message_id: Uuid) -> Result<IdempotencyStatus, Error> {
        let key = key_for(message_id);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| anyhow!("Failed to get cached value: {}", e))?;

        match value.as_deref() {
            None => Ok(IdempotencyStatus::NotFound),
            Some("processing") => Ok(IdempotencyStatus::Processing),
            Some("sent") => Ok(IdempotencyStatus::Sent),
            Some("failed") => Ok(IdempotencyStatus::Failed),
            Some(other) => {
                warn!(key = %key, status = other, "Unknown idempotency status");
                Ok(IdempotencyStatus::NotFound)
            }
        }
    }

    async fn mark_as_processing(&self, message_id: Uuid) -> Result<(), Error> {
        self.set_status(message_id, "processing").await
    }

    async fn mark_as_sent(&self, message_id: Uuid) -> Result<(), Error> {
        retry_with_backoff(&self.retry_config, || {
            let key = key_for(message_id);
            let mut conn = self.connection.clone();
            let ttl = self.idempotency_ttl_seconds;

            async move {
                conn.set_ex::<_, _, ()>(&key, "sent", ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("mark_as_sent failed: {}", e))
    }

    async fn mark_as_failed(&self, message_id: Uuid) -> Result<(), Error> {
        self.set_status(message_id, "failed").await
    }

    async fn health_check(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();

        conn.ping::<String>()
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;

        Ok(())
    }
}
