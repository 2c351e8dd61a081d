use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        database::NotificationStore,
        email::{EmailProvider, OutgoingEmail},
        redis::SendLedger,
    },
    models::{
        notification::QueueEnvelope,
        status::{DeliveryChannel, IdempotencyStatus},
    },
    templates::EmailTemplates,
    utils::bounded,
    workers::{HandleOutcome, MessageHandler, decode_envelope, record_delivery},
};

/// Sends high-priority notifications one at a time as they arrive.
///
/// Every delivery is acknowledged once handled: a failed send is logged as
/// `failed` and never retried.
pub struct ImmediateEmailWorker {
    store: Arc<dyn NotificationStore>,
    email: Arc<dyn EmailProvider>,
    ledger: Arc<dyn SendLedger>,
    templates: Arc<EmailTemplates>,
    timeout: Duration,
}

impl ImmediateEmailWorker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        email: Arc<dyn EmailProvider>,
        ledger: Arc<dyn SendLedger>,
        templates: Arc<EmailTemplates>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            email,
            ledger,
            templates,
            timeout,
        }
    }

    async fn already_handled(&self, message_id: Uuid) -> bool {
        match bounded(self.timeout, "ledger_check", self.ledger.check(message_id)).await {
            Ok(IdempotencyStatus::Sent) => {
                info!(message_id = %message_id, "Email already sent, skipping");
                true
            }
            Ok(IdempotencyStatus::Processing) => {
                info!(message_id = %message_id, "Email already in flight, skipping");
                true
            }
            Ok(IdempotencyStatus::NotFound) | Ok(IdempotencyStatus::Failed) => false,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Idempotency check failed, proceeding");
                false
            }
        }
    }

    async fn mark(&self, message_id: Option<Uuid>, status: IdempotencyStatus) {
        let Some(message_id) = message_id else {
            return;
        };

        let update = match status {
            IdempotencyStatus::Processing => self.ledger.mark_as_processing(message_id),
            IdempotencyStatus::Sent => self.ledger.mark_as_sent(message_id),
            IdempotencyStatus::Failed => self.ledger.mark_as_failed(message_id),
            IdempotencyStatus::NotFound => return,
        };

        if let Err(e) = bounded(self.timeout, "ledger_update", update).await {
            warn!(
                message_id = %message_id,
                status = ?status,
                error = %e,
                "Failed to update idempotency ledger"
            );
        }
    }

    async fn send(&self, envelope: &QueueEnvelope, to: String) -> Result<(), String> {
        let rendered = self
            .templates
            .render_single(envelope)
            .map_err(|e| e.to_string())?;

        let email = OutgoingEmail {
            to,
            subject: rendered.subject,
            html: rendered.html,
        };

        bounded(self.timeout, "email_send", self.email.send(&email))
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl MessageHandler for ImmediateEmailWorker {
    async fn handle(&self, payload: &[u8]) -> HandleOutcome {
        let envelope = match decode_envelope(payload) {
            Ok(envelope) => envelope,
            Err(outcome) => return outcome,
        };

        if let Some(message_id) = envelope.message_id {
            if self.already_handled(message_id).await {
                return HandleOutcome::Ack;
            }
        }

        self.mark(envelope.message_id, IdempotencyStatus::Processing).await;

        let lookup = bounded(
            self.timeout,
            "lookup_email",
            self.store.lookup_email(envelope.user_id),
        )
        .await;

        let to = match lookup {
            Ok(Some(to)) => to,
            Ok(None) => {
                warn!(user_id = envelope.user_id, "No email address for user, skipping");
                self.mark(envelope.message_id, IdempotencyStatus::Failed).await;
                return HandleOutcome::Ack;
            }
            Err(e) => {
                warn!(user_id = envelope.user_id, error = %e, "Email lookup failed, skipping");
                self.mark(envelope.message_id, IdempotencyStatus::Failed).await;
                return HandleOutcome::Ack;
            }
        };

        match self.send(&envelope, to).await {
            Ok(()) => {
                self.mark(envelope.message_id, IdempotencyStatus::Sent).await;
                record_delivery(
                    self.store.as_ref(),
                    &envelope,
                    DeliveryChannel::Email,
                    None,
                    self.timeout,
                )
                .await;

                info!(
                    user_id = envelope.user_id,
                    message_id = ?envelope.message_id,
                    provider = self.email.name(),
                    "Immediate email sent"
                );
            }
            Err(e) => {
                self.mark(envelope.message_id, IdempotencyStatus::Failed).await;
                record_delivery(
                    self.store.as_ref(),
                    &envelope,
                    DeliveryChannel::Email,
                    Some(e.as_str()),
                    self.timeout,
                )
                .await;

                warn!(
                    user_id = envelope.user_id,
                    message_id = ?envelope.message_id,
                    error = %e,
                    "Immediate email failed"
                );
            }
        }

        debug!(user_id = envelope.user_id, "Immediate email handled");

        HandleOutcome::Ack
    }
}
