use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::models::health::{ConsumerState, WorkerHealth};

/// Last reported state of every consumer in this process, read by `/health`.
#[derive(Default)]
pub struct WorkerMonitor {
    workers: RwLock<BTreeMap<String, WorkerHealth>>,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: &str, queue: &str) {
        self.workers.write().insert(
            worker.to_string(),
            WorkerHealth {
                queue: queue.to_string(),
                state: ConsumerState::Starting,
                since: Utc::now(),
                last_error: None,
            },
        );
    }

    /// Records a transition. `error` replaces the last error only when set.
    pub fn report(&self, worker: &str, state: ConsumerState, error: Option<String>) {
        let mut workers = self.workers.write();

        let Some(health) = workers.get_mut(worker) else {
            return;
        };

        if health.state != state {
            health.state = state;
            health.since = Utc::now();
        }

        if error.is_some() {
            health.last_error = error;
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, WorkerHealth> {
        self.workers.read().clone()
    }
}
