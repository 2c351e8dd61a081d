//! Broker plumbing: queue topology, the RabbitMQ client and the publishing
//! seam shared by the router and the workers.

pub mod rabbitmq;
pub mod topology;

use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::{
    rabbitmq::{PublishOptions, RabbitMqClient},
    topology::{QueueKind, QueueTopology},
};

/// Anything that can durably enqueue a payload on a logical queue.
///
/// Returns once the broker has confirmed receipt, never once a consumer has
/// processed the message.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        queue: QueueKind,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), Error>;

    /// Confirms the broker is reachable, reusing an open connection.
    async fn health_check(&self) -> Result<(), Error>;
}

/// Process-wide publisher that lazily (re)connects.
///
/// A publish on a dropped connection triggers one reconnect attempt; if that
/// fails the error is returned to the caller immediately.
pub struct BrokerPublisher {
    rabbitmq_url: String,
    topology: QueueTopology,
    client: Mutex<Option<Arc<RabbitMqClient>>>,
}

impl BrokerPublisher {
    pub fn new(rabbitmq_url: &str, topology: QueueTopology) -> Self {
        Self {
            rabbitmq_url: rabbitmq_url.to_string(),
            topology,
            client: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Arc<RabbitMqClient>, Error> {
        let mut guard = self.client.lock().await;

        if let Some(client) = guard.as_ref() {
            if client.is_connected() {
                return Ok(Arc::clone(client));
            }
            warn!("Publisher connection lost, reconnecting");
        }

        let client = Arc::new(RabbitMqClient::connect(&self.rabbitmq_url, &self.topology).await?);
        info!("Publisher connected to RabbitMQ");
        *guard = Some(Arc::clone(&client));

        Ok(client)
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    async fn publish(
        &self,
        queue: QueueKind,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), Error> {
        let client = self.client().await?;

        if let Err(e) = client.publish(queue, &payload, options).await {
            // Force a fresh connection on the next call.
            self.client.lock().await.take();
            return Err(e);
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.client().await.map(|_| ())
    }
}
