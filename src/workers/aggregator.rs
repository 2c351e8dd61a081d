//! Batch and digest email aggregation.
//!
//! Collection and flushing are decoupled: the consumer only appends to an
//! in-memory [`AggregationBuffer`] and acknowledges, while a timer drains the
//! buffer and sends one email per user. Buffered entries are held in memory
//! only and do not survive a restart.

use std::{collections::HashMap, mem, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    clients::{
        database::NotificationStore,
        email::{EmailProvider, OutgoingEmail},
    },
    models::{notification::QueueEnvelope, status::DeliveryChannel},
    templates::{EmailTemplates, RenderedEmail},
    utils::bounded,
    workers::{HandleOutcome, MessageHandler, decode_envelope, record_delivery},
};

/// Per-user pending envelopes. `append` and `drain_all` are the only
/// mutation points.
#[derive(Default)]
pub struct AggregationBuffer {
    pending: Mutex<HashMap<i64, Vec<QueueEnvelope>>>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, envelope: QueueEnvelope) {
        self.pending
            .lock()
            .entry(envelope.user_id)
            .or_default()
            .push(envelope);
    }

    /// Swaps in an empty map and returns everything buffered so far.
    pub fn drain_all(&self) -> HashMap<i64, Vec<QueueEnvelope>> {
        mem::take(&mut *self.pending.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    pub fn user_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Batch,
    Digest,
}

impl AggregateKind {
    pub fn channel(&self) -> DeliveryChannel {
        match self {
            AggregateKind::Batch => DeliveryChannel::EmailBatch,
            AggregateKind::Digest => DeliveryChannel::EmailDigest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Batch => "batch",
            AggregateKind::Digest => "digest",
        }
    }

    fn render(
        &self,
        templates: &EmailTemplates,
        envelopes: &[QueueEnvelope],
    ) -> anyhow::Result<RenderedEmail> {
        match self {
            AggregateKind::Batch => templates.render_batch(envelopes),
            AggregateKind::Digest => templates.render_digest(envelopes),
        }
    }
}

/// Counters for one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub recipients: usize,
    pub notifications: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum UserResult {
    Sent,
    Failed,
    Skipped,
}

pub struct AggregatorWorker {
    kind: AggregateKind,
    buffer: Arc<AggregationBuffer>,
    store: Arc<dyn NotificationStore>,
    email: Arc<dyn EmailProvider>,
    templates: Arc<EmailTemplates>,
    timeout: Duration,
}

impl AggregatorWorker {
    pub fn new(
        kind: AggregateKind,
        store: Arc<dyn NotificationStore>,
        email: Arc<dyn EmailProvider>,
        templates: Arc<EmailTemplates>,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            buffer: Arc::new(AggregationBuffer::new()),
            store,
            email,
            templates,
            timeout,
        }
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    pub fn buffer(&self) -> &Arc<AggregationBuffer> {
        &self.buffer
    }

    /// Drains the buffer and sends one email per user. A failure for one
    /// user never affects another; failed users' entries are dropped.
    pub async fn flush(&self) -> FlushReport {
        let drained = self.buffer.drain_all();

        let mut report = FlushReport {
            recipients: drained.len(),
            notifications: drained.values().map(Vec::len).sum(),
            ..Default::default()
        };

        if drained.is_empty() {
            debug!(kind = self.kind.as_str(), "Nothing to flush");
            return report;
        }

        info!(
            kind = self.kind.as_str(),
            recipients = report.recipients,
            notifications = report.notifications,
            "Flushing aggregated emails"
        );

        let mut users: Vec<(i64, Vec<QueueEnvelope>)> = drained.into_iter().collect();
        users.sort_by_key(|(user_id, _)| *user_id);

        for (user_id, envelopes) in users {
            match self.flush_user(user_id, &envelopes).await {
                UserResult::Sent => report.sent += 1,
                UserResult::Failed => report.failed += 1,
                UserResult::Skipped => report.skipped += 1,
            }
        }

        info!(
            kind = self.kind.as_str(),
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Flush complete"
        );

        report
    }

    async fn flush_user(&self, user_id: i64, envelopes: &[QueueEnvelope]) -> UserResult {
        let to = match bounded(self.timeout, "lookup_email", self.store.lookup_email(user_id)).await
        {
            Ok(Some(to)) => to,
            Ok(None) => {
                warn!(user_id, kind = self.kind.as_str(), "No email address for user, skipping");
                return UserResult::Skipped;
            }
            Err(e) => {
                warn!(user_id, kind = self.kind.as_str(), error = %e, "Email lookup failed, skipping");
                return UserResult::Skipped;
            }
        };

        let result = match self.kind.render(&self.templates, envelopes) {
            Ok(rendered) => {
                let email = OutgoingEmail {
                    to,
                    subject: rendered.subject,
                    html: rendered.html,
                };
                bounded(self.timeout, "email_send", self.email.send(&email)).await
            }
            Err(e) => Err(e),
        };

        let error = result.err().map(|e| e.to_string());

        for envelope in envelopes {
            record_delivery(
                self.store.as_ref(),
                envelope,
                self.kind.channel(),
                error.as_deref(),
                self.timeout,
            )
            .await;
        }

        match error {
            None => {
                info!(
                    user_id,
                    kind = self.kind.as_str(),
                    count = envelopes.len(),
                    "Aggregated email sent"
                );
                UserResult::Sent
            }
            Some(e) => {
                warn!(
                    user_id,
                    kind = self.kind.as_str(),
                    count = envelopes.len(),
                    error = %e,
                    "Aggregated email failed"
                );
                UserResult::Failed
            }
        }
    }

    /// Flushes every `period`, the first time after `warmup`, until shutdown.
    pub async fn run_flush_loop(
        self: Arc<Self>,
        warmup: Duration,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval_at(Instant::now() + warmup, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            kind = self.kind.as_str(),
            period_secs = period.as_secs(),
            "Flush timer started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            kind = self.kind.as_str(),
            pending = self.buffer.pending_count(),
            "Flush timer stopped"
        );
    }
}

#[async_trait]
impl MessageHandler for AggregatorWorker {
    async fn handle(&self, payload: &[u8]) -> HandleOutcome {
        let envelope = match decode_envelope(payload) {
            Ok(envelope) => envelope,
            Err(outcome) => return outcome,
        };

        debug!(
            user_id = envelope.user_id,
            kind = self.kind.as_str(),
            "Notification buffered"
        );

        self.buffer.append(envelope);

        HandleOutcome::Ack
    }
}
