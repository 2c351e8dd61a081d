use std::fmt::{Display, Formatter, Result};

/// Highest priority accepted by the priority-capable queues.
pub const MAX_PRIORITY: i32 = 10;

/// Header carrying how many times a message has already been requeued.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    InApp,
    ImmediateEmail,
    BatchEmail,
    DigestEmail,
    Fanout,
    DeadLetter,
}

impl QueueKind {
    pub const ALL: [QueueKind; 6] = [
        QueueKind::InApp,
        QueueKind::ImmediateEmail,
        QueueKind::BatchEmail,
        QueueKind::DigestEmail,
        QueueKind::Fanout,
        QueueKind::DeadLetter,
    ];

    /// Only the in-app and high-priority email queues are declared with
    /// `x-max-priority`.
    pub fn supports_priority(&self) -> bool {
        matches!(self, QueueKind::InApp | QueueKind::ImmediateEmail)
    }

    pub fn is_email(&self) -> bool {
        matches!(
            self,
            QueueKind::ImmediateEmail | QueueKind::BatchEmail | QueueKind::DigestEmail
        )
    }
}

impl Display for QueueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let name = match self {
            QueueKind::InApp => "inapp",
            QueueKind::ImmediateEmail => "email_immediate",
            QueueKind::BatchEmail => "email_batch",
            QueueKind::DigestEmail => "email_digest",
            QueueKind::Fanout => "fanout",
            QueueKind::DeadLetter => "dead_letter",
        };
        write!(f, "{}", name)
    }
}

/// Concrete queue names for each logical queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub inapp: String,
    pub immediate_email: String,
    pub batch_email: String,
    pub digest_email: String,
    pub fanout: String,
    pub dead_letter: String,
}

impl QueueTopology {
    pub fn name(&self, kind: QueueKind) -> &str {
        match kind {
            QueueKind::InApp => &self.inapp,
            QueueKind::ImmediateEmail => &self.immediate_email,
            QueueKind::BatchEmail => &self.batch_email,
            QueueKind::DigestEmail => &self.digest_email,
            QueueKind::Fanout => &self.fanout,
            QueueKind::DeadLetter => &self.dead_letter,
        }
    }
}
