use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    broker::topology::QueueTopology, models::retry::RetryConfig, realtime::DEFAULT_SESSION_QUEUE,
    workers::WorkerKind,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,

    #[serde(default = "default_inapp_queue")]
    pub inapp_queue_name: String,
    #[serde(default = "default_immediate_queue")]
    pub immediate_email_queue_name: String,
    #[serde(default = "default_batch_queue")]
    pub batch_email_queue_name: String,
    #[serde(default = "default_digest_queue")]
    pub digest_email_queue_name: String,
    #[serde(default = "default_fanout_queue")]
    pub fanout_queue_name: String,
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue_name: String,

    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,

    pub database_url: String,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_seconds: u64,

    pub sendgrid_api_key: String,
    pub sendgrid_from_email: String,
    #[serde(default = "default_sendgrid_from_name")]
    pub sendgrid_from_name: String,
    #[serde(default = "default_sendgrid_api_url")]
    pub sendgrid_api_url: String,

    #[serde(default = "default_batch_interval")]
    pub batch_flush_interval_seconds: u64,
    #[serde(default = "default_digest_interval")]
    pub digest_flush_interval_seconds: u64,
    #[serde(default = "default_flush_warmup")]
    pub flush_warmup_seconds: u64,

    #[serde(default = "default_outbound_timeout")]
    pub outbound_timeout_ms: u64,

    #[serde(default = "default_workers")]
    pub workers: Vec<String>,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_ws_session_queue")]
    pub ws_session_queue_size: usize,

    #[serde(default = "default_app_env")]
    pub app_env: String,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.enabled_workers()?;

        if config.batch_flush_interval_seconds == 0 || config.digest_flush_interval_seconds == 0 {
            return Err(anyhow!("Flush intervals must be at least one second"));
        }

        if config.ws_session_queue_size == 0 {
            return Err(anyhow!("WS_SESSION_QUEUE_SIZE must be at least one"));
        }

        Ok(config)
    }

    pub fn topology(&self) -> QueueTopology {
        QueueTopology {
            inapp: self.inapp_queue_name.clone(),
            immediate_email: self.immediate_email_queue_name.clone(),
            batch_email: self.batch_email_queue_name.clone(),
            digest_email: self.digest_email_queue_name.clone(),
            fanout: self.fanout_queue_name.clone(),
            dead_letter: self.dead_letter_queue_name.clone(),
        }
    }

    /// Parses `WORKERS`; an unknown name is a configuration error.
    pub fn enabled_workers(&self) -> Result<Vec<WorkerKind>, Error> {
        let mut kinds = Vec::new();

        for name in self.workers.iter().map(|w| w.trim()).filter(|w| !w.is_empty()) {
            let kind = name.parse::<WorkerKind>()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        Ok(kinds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_timeout_ms)
    }

    pub fn flush_warmup(&self) -> Duration {
        Duration::from_secs(self.flush_warmup_seconds)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn default_inapp_queue() -> String {
    "notifications.inapp".to_string()
}

fn default_immediate_queue() -> String {
    "notifications.email.high".to_string()
}

fn default_batch_queue() -> String {
    "notifications.email.batch".to_string()
}

fn default_digest_queue() -> String {
    "notifications.email.digest".to_string()
}

fn default_fanout_queue() -> String {
    "notifications.websocket".to_string()
}

fn default_dead_letter_queue() -> String {
    "notifications.dead_letter".to_string()
}

fn default_max_redeliveries() -> u32 {
    5
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_idempotency_ttl() -> u64 {
    86_400
}

fn default_sendgrid_from_name() -> String {
    "Notifications".to_string()
}

fn default_sendgrid_api_url() -> String {
    "https://api.sendgrid.com/v3".to_string()
}

fn default_batch_interval() -> u64 {
    15 * 60
}

fn default_digest_interval() -> u64 {
    24 * 60 * 60
}

fn default_flush_warmup() -> u64 {
    5
}

fn default_outbound_timeout() -> u64 {
    10_000
}

fn default_workers() -> Vec<String> {
    ["inapp", "email", "batch", "digest", "push"]
        .iter()
        .map(|w| w.to_string())
        .collect()
}

fn default_server_port() -> u16 {
    8080
}

fn default_ws_session_queue() -> usize {
    DEFAULT_SESSION_QUEUE
}

fn default_app_env() -> String {
    "development".to_string()
}
