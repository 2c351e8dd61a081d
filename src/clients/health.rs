use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Error, Result};
use tracing::{debug, warn};

use crate::{
    broker::Publisher,
    clients::{database::NotificationStore, redis::SendLedger},
    models::health::{DependencyHealth, HealthReport},
    utils::bounded,
    workers::monitor::WorkerMonitor,
};

const DATABASE: &str = "database";
const CACHE_SERVICE: &str = "cache_service";
const MESSAGE_BROKER: &str = "message_broker";

/// Probes the pipeline's dependencies and folds in consumer state.
pub struct HealthChecker {
    store: Arc<dyn NotificationStore>,
    ledger: Arc<dyn SendLedger>,
    broker: Arc<dyn Publisher>,
    monitor: Arc<WorkerMonitor>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        ledger: Arc<dyn SendLedger>,
        broker: Arc<dyn Publisher>,
        monitor: Arc<WorkerMonitor>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            broker,
            monitor,
            timeout,
        }
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut dependencies = HashMap::new();

        let started = Instant::now();
        let db = bounded(self.timeout, "database_health", self.store.health_check()).await;
        dependencies.insert(DATABASE.to_string(), self.assess(DATABASE, started, db));

        let started = Instant::now();
        let cache = bounded(self.timeout, "cache_health", self.ledger.health_check()).await;
        dependencies.insert(
            CACHE_SERVICE.to_string(),
            self.assess(CACHE_SERVICE, started, cache),
        );

        let started = Instant::now();
        let broker = bounded(self.timeout, "broker_health", self.broker.health_check()).await;
        dependencies.insert(
            MESSAGE_BROKER.to_string(),
            self.assess(MESSAGE_BROKER, started, broker),
        );

        HealthReport::new(dependencies, self.monitor.snapshot())
    }

    fn assess(&self, service: &str, started: Instant, result: Result<(), Error>) -> DependencyHealth {
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match result {
            Ok(()) if elapsed > self.timeout / 2 => {
                warn!(service, response_time_ms = elapsed_ms, "Health check slow");
                DependencyHealth::slow(elapsed_ms)
            }
            Ok(()) => {
                debug!(service, response_time_ms = elapsed_ms, "Health check passed");
                DependencyHealth::up(elapsed_ms)
            }
            Err(e) => {
                warn!(service, error = %e, "Health check failed");
                DependencyHealth::down(e.to_string())
            }
        }
    }
}
