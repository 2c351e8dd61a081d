use anyhow::{Error, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info};

use crate::{
    broker::topology::{MAX_PRIORITY, QueueKind, QueueTopology, RETRY_COUNT_HEADER},
    models::message::DlqMessage,
};

/// Per-message publish options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub priority: Option<u8>,
    pub retry_count: Option<u32>,
}

impl PublishOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self {
            priority: Some(priority),
            retry_count: None,
        }
    }
}

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    topology: QueueTopology,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str, topology: &QueueTopology) -> Result<Self, Error> {
        debug!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        let client = Self {
            connection,
            channel,
            topology: topology.clone(),
        };

        client.declare_topology().await?;

        info!("RabbitMQ connection established and queues declared");

        Ok(client)
    }

    async fn declare_topology(&self) -> Result<(), Error> {
        for kind in QueueKind::ALL {
            let mut arguments = FieldTable::default();
            if kind.supports_priority() {
                arguments.insert("x-max-priority".into(), AMQPValue::LongInt(MAX_PRIORITY));
            }

            let name = self.topology.name(kind);

            self.channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    arguments,
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {}", name, e))?;

            debug!(queue = %name, "Queue declared");
        }

        Ok(())
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Caps unacknowledged deliveries on this channel. Zero means unlimited.
    pub async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), Error> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        debug!(prefetch_count, "Prefetch count set");

        Ok(())
    }

    pub async fn create_consumer(
        &self,
        queue: QueueKind,
        consumer_tag: &str,
    ) -> Result<Consumer, Error> {
        let name = self.topology.name(queue);

        let consumer = self
            .channel
            .basic_consume(
                name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer on {}: {}", name, e))?;

        info!(queue = %name, consumer_tag, "Consumer created for queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    /// Publishes a persistent JSON message and waits for the broker confirm.
    pub async fn publish(
        &self,
        queue: QueueKind,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<(), Error> {
        let name = self.topology.name(queue);

        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into());

        if let Some(priority) = options.priority {
            properties = properties.with_priority(priority);
        }

        if let Some(retry_count) = options.retry_count {
            let mut headers = FieldTable::default();
            headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(retry_count));
            properties = properties.with_headers(headers);
        }

        let confirmation = self
            .channel
            .basic_publish(
                "",
                name,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish to {}: {}", name, e))?
            .await
            .map_err(|e| anyhow!("Publish to {} was not confirmed: {}", name, e))?;

        if confirmation.is_nack() {
            return Err(anyhow!("Broker rejected publish to {}", name));
        }

        Ok(())
    }

    pub async fn publish_to_dlq(&self, message: &DlqMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        self.publish(QueueKind::DeadLetter, &payload, PublishOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to publish message to dlq: {}", e))
    }
}

/// Reads the requeue counter stamped on a delivery; absent means first attempt.
pub fn retry_count(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
                .map(|(_, value)| value)
        })
        .and_then(amqp_to_u32)
        .unwrap_or(0)
}

fn amqp_to_u32(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

pub fn dlq_message(queue: &str, payload: &[u8], reason: &str, retry_count: u32) -> DlqMessage {
    DlqMessage {
        queue: queue.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
        failure_reason: reason.to_string(),
        retry_count,
        failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}
