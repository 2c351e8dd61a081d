use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use lapin::message::Delivery;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    broker::{
        rabbitmq::{PublishOptions, RabbitMqClient, dlq_message, retry_count},
        topology::{QueueKind, QueueTopology},
    },
    models::health::ConsumerState,
    workers::{HandleOutcome, MessageHandler, monitor::WorkerMonitor},
};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Key under which the loop reports its state.
    pub worker: String,
    pub queue: QueueKind,
    pub consumer_tag: String,
    pub prefetch: Option<u16>,
    pub max_redeliveries: u32,
    pub reconnect_delay: Duration,
}

/// Broker-level action for a handled delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Ack,
    /// Republish with the given counter, then ack the original.
    Requeue { retry_count: u32 },
    DeadLetter { reason: String, retry_count: u32 },
}

pub fn settlement_for(outcome: HandleOutcome, retry_count: u32, max_redeliveries: u32) -> Settlement {
    match outcome {
        HandleOutcome::Ack => Settlement::Ack,
        HandleOutcome::Retry(reason) if retry_count >= max_redeliveries => Settlement::DeadLetter {
            reason: format!("{} (gave up after {} redeliveries)", reason, retry_count),
            retry_count,
        },
        HandleOutcome::Retry(_) => Settlement::Requeue {
            retry_count: retry_count + 1,
        },
        HandleOutcome::DeadLetter(reason) => Settlement::DeadLetter {
            reason,
            retry_count,
        },
    }
}

enum SessionEnd {
    Shutdown,
    StreamClosed,
}

/// Consumes `settings.queue` until shutdown, reconnecting after a fixed
/// delay whenever the connection is lost. There is no attempt limit.
pub async fn run_consumer<H>(
    rabbitmq_url: String,
    topology: QueueTopology,
    settings: ConsumerSettings,
    handler: Arc<H>,
    monitor: Arc<WorkerMonitor>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error>
where
    H: MessageHandler + ?Sized,
{
    let queue = topology.name(settings.queue).to_string();
    let worker = settings.worker.as_str();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let session = consume_session(
            &rabbitmq_url,
            &topology,
            &settings,
            handler.as_ref(),
            monitor.as_ref(),
            &mut shutdown,
        )
        .await;

        match session {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::StreamClosed) => {
                warn!(queue = %queue, "Consumer stream closed by broker");
                monitor.report(
                    worker,
                    ConsumerState::Reconnecting,
                    Some("Consumer stream closed by broker".to_string()),
                );
            }
            Err(e) => {
                error!(queue = %queue, error = %e, "Consumer session failed");
                monitor.report(worker, ConsumerState::Reconnecting, Some(e.to_string()));
            }
        }

        info!(
            queue = %queue,
            delay_secs = settings.reconnect_delay.as_secs(),
            "Reconnecting consumer"
        );

        tokio::select! {
            _ = sleep(settings.reconnect_delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    monitor.report(worker, ConsumerState::Stopped, None);
    info!(queue = %queue, "Consumer stopped");

    Ok(())
}

async fn consume_session<H>(
    rabbitmq_url: &str,
    topology: &QueueTopology,
    settings: &ConsumerSettings,
    handler: &H,
    monitor: &WorkerMonitor,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, Error>
where
    H: MessageHandler + ?Sized,
{
    let client = RabbitMqClient::connect(rabbitmq_url, topology).await?;
    client.set_prefetch(settings.prefetch.unwrap_or(0)).await?;

    let mut consumer = client
        .create_consumer(settings.queue, &settings.consumer_tag)
        .await?;

    monitor.report(&settings.worker, ConsumerState::Consuming, None);

    loop {
        let next = tokio::select! {
            next = consumer.next() => next,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(SessionEnd::Shutdown);
                }
                continue;
            }
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => return Err(anyhow!("Consumer stream error: {}", e)),
            None => return Ok(SessionEnd::StreamClosed),
        };

        let retries = retry_count(&delivery.properties);

        debug!(
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            retry_count = retries,
            "Delivery received"
        );

        let outcome = handler.handle(&delivery.data).await;
        let settlement = settlement_for(outcome, retries, settings.max_redeliveries);

        settle(&client, settings.queue, &delivery, settlement).await?;
    }
}

async fn settle(
    client: &RabbitMqClient,
    queue: QueueKind,
    delivery: &Delivery,
    settlement: Settlement,
) -> Result<(), Error> {
    let tag = delivery.delivery_tag;

    match settlement {
        Settlement::Ack => client.acknowledge(tag).await,
        Settlement::Requeue { retry_count } => {
            let options = PublishOptions {
                priority: *delivery.properties.priority(),
                retry_count: Some(retry_count),
            };

            match client.publish(queue, &delivery.data, options).await {
                Ok(()) => {
                    info!(delivery_tag = tag, retry_count, "Message requeued for retry");
                    client.acknowledge(tag).await
                }
                Err(e) => {
                    warn!(delivery_tag = tag, error = %e, "Requeue publish failed, rejecting to broker");
                    client.reject(tag, true).await
                }
            }
        }
        Settlement::DeadLetter {
            reason,
            retry_count,
        } => {
            let name = client.topology().name(queue).to_string();
            let message = dlq_message(&name, &delivery.data, &reason, retry_count);

            client.publish_to_dlq(&message).await?;

            warn!(
                queue = %name,
                delivery_tag = tag,
                retry_count,
                reason = %reason,
                "Message routed to dead-letter queue"
            );

            client.acknowledge(tag).await
        }
    }
}
