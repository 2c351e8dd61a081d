use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Lifecycle of one queue consumer, as last reported by its loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Starting,
    Consuming,
    Reconnecting,
    Stopped,
}

impl ConsumerState {
    pub fn health(&self) -> HealthStatus {
        match self {
            ConsumerState::Consuming => HealthStatus::Healthy,
            ConsumerState::Starting | ConsumerState::Reconnecting => HealthStatus::Degraded,
            ConsumerState::Stopped => HealthStatus::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerHealth {
    pub queue: String,
    pub state: ConsumerState,
    pub since: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of probing one external dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DependencyHealth {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            detail: None,
        }
    }

    /// Reachable, but slow enough to put real traffic near its timeout.
    pub fn slow(latency_ms: u64) -> Self {
        Self {
            status: HealthStatus::Degraded,
            latency_ms: Some(latency_ms),
            detail: Some("Slow response".to_string()),
        }
    }

    pub fn down(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            detail: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub dependencies: HashMap<String, DependencyHealth>,
    pub workers: BTreeMap<String, WorkerHealth>,
}

impl HealthReport {
    /// The worst status across dependencies and workers.
    pub fn new(
        dependencies: HashMap<String, DependencyHealth>,
        workers: BTreeMap<String, WorkerHealth>,
    ) -> Self {
        let status = dependencies
            .values()
            .map(|d| d.status)
            .chain(workers.values().map(|w| w.state.health()))
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            timestamp: Utc::now(),
            dependencies,
            workers,
        }
    }
}
