use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;

/// A fully rendered email.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Sends one email from the configured sender address.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), Error>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
    pub api_url: String,
}

impl SendGridConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.sendgrid_api_key.clone(),
            from_email: config.sendgrid_from_email.clone(),
            from_name: config.sendgrid_from_name.clone(),
            api_url: config.sendgrid_api_url.trim_end_matches('/').to_string(),
        }
    }
}

pub struct SendGridProvider {
    config: SendGridConfig,
    http_client: Client,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> Self {
        info!(api_url = %config.api_url, "SendGrid provider initialized");

        Self {
            config,
            http_client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorBody {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), Error> {
        let request = SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: email.to.clone(),
                    name: None,
                }],
            }],
            from: EmailAddress {
                email: self.config.from_email.clone(),
                name: Some(self.config.from_name.clone()),
            },
            subject: email.subject.clone(),
            content: vec![Content {
                content_type: "text/html".to_string(),
                value: email.html.clone(),
            }],
        };

        debug!(to = %email.to, subject = %email.subject, "Sending email via SendGrid");

        let response = self
            .http_client
            .post(format!("{}/mail/send", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("SendGrid request failed: {}", e))?;

        let status = response.status();

        if status.is_success() {
            debug!(to = %email.to, "Email accepted by SendGrid");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<SendGridErrorBody>(&body) {
            Ok(parsed) => parsed
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => body,
        };

        warn!(to = %email.to, status = %status, error = %detail, "SendGrid rejected email");

        Err(anyhow!("SendGrid error ({}): {}", status, detail))
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }
}
