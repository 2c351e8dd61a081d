use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use notification_pipeline::{
    api::{AppState, run_api_server},
    broker::{BrokerPublisher, Publisher},
    clients::{
        database::{NotificationStore, PostgresStore},
        email::{EmailProvider, SendGridConfig, SendGridProvider},
        health::HealthChecker,
        redis::{RedisLedger, SendLedger},
    },
    config::Config,
    realtime::{RealtimeTransport, RoomHub},
    telemetry::init_tracing,
    templates::EmailTemplates,
    workers::{
        MessageHandler, WorkerKind,
        aggregator::{AggregateKind, AggregatorWorker},
        consumer::{ConsumerSettings, run_consumer},
        immediate::ImmediateEmailWorker,
        inapp::InAppWorker,
        monitor::WorkerMonitor,
        push::PushGateway,
    },
};
use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    init_tracing(config.is_production())?;

    let _ = rustls::crypto::ring::default_provider().install_default();

    let workers = config.enabled_workers()?;
    let topology = config.topology();
    let timeout = config.outbound_timeout();

    info!(
        workers = ?workers.iter().map(|w| w.as_str()).collect::<Vec<_>>(),
        env = %config.app_env,
        "Starting notification pipeline"
    );

    let store: Arc<dyn NotificationStore> =
        Arc::new(PostgresStore::connect(&config.database_url).await?);
    let ledger: Arc<dyn SendLedger> = Arc::new(RedisLedger::connect(&config).await?);
    let email: Arc<dyn EmailProvider> =
        Arc::new(SendGridProvider::new(SendGridConfig::from_config(&config)));
    let publisher: Arc<dyn Publisher> =
        Arc::new(BrokerPublisher::new(&config.rabbitmq_url, topology.clone()));
    let monitor = Arc::new(WorkerMonitor::new());
    let templates = Arc::new(EmailTemplates::new()?);
    let hub = Arc::new(RoomHub::with_capacity(config.ws_session_queue_size));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for kind in &workers {
        let handler: Arc<dyn MessageHandler> = match kind {
            WorkerKind::InApp => Arc::new(InAppWorker::new(
                store.clone(),
                publisher.clone(),
                timeout,
            )),
            WorkerKind::ImmediateEmail => Arc::new(ImmediateEmailWorker::new(
                store.clone(),
                email.clone(),
                ledger.clone(),
                templates.clone(),
                timeout,
            )),
            WorkerKind::BatchEmail | WorkerKind::DigestEmail => {
                let (aggregate, period) = match kind {
                    WorkerKind::BatchEmail => {
                        (AggregateKind::Batch, config.batch_flush_interval_seconds)
                    }
                    _ => (AggregateKind::Digest, config.digest_flush_interval_seconds),
                };

                let worker = Arc::new(AggregatorWorker::new(
                    aggregate,
                    store.clone(),
                    email.clone(),
                    templates.clone(),
                    timeout,
                ));

                tasks.spawn(worker.clone().run_flush_loop(
                    config.flush_warmup(),
                    Duration::from_secs(period),
                    shutdown_rx.clone(),
                ));

                worker
            }
            WorkerKind::Push => {
                let transport: Arc<dyn RealtimeTransport> = hub.clone();
                Arc::new(PushGateway::new(transport))
            }
        };

        let settings = ConsumerSettings {
            worker: kind.as_str().to_string(),
            queue: kind.queue(),
            consumer_tag: format!("{}-worker", kind.as_str()),
            prefetch: kind.prefetch(),
            max_redeliveries: config.max_redeliveries,
            reconnect_delay: config.reconnect_delay(),
        };

        monitor.register(kind.as_str(), topology.name(kind.queue()));

        let url = config.rabbitmq_url.clone();
        let topology = topology.clone();
        let monitor = monitor.clone();
        let shutdown = shutdown_rx.clone();
        let name = kind.as_str();

        tasks.spawn(async move {
            if let Err(e) = run_consumer(url, topology, settings, handler, monitor, shutdown).await {
                error!(worker = name, error = %e, "Worker exited with error");
            }
        });

        info!(worker = kind.as_str(), queue = %kind.queue(), "Worker started");
    }

    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(
            store.clone(),
            ledger.clone(),
            publisher.clone(),
            monitor.clone(),
            timeout,
        ),
        hub: hub.clone(),
    });

    let port = config.server_port;
    let server_shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        if let Err(e) = run_api_server(port, state, server_shutdown).await {
            error!(error = %e, "HTTP server exited with error");
        }
    });

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, stopping workers");
    let _ = shutdown_tx.send(true);

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Task panicked during shutdown");
        }
    }

    info!("Notification pipeline stopped");

    Ok(())
}
