use serde::Serialize;

use crate::models::{message::QueueKind, notification::Notification};

/// Outcome of the best-effort email that accompanies some enqueues. It is
/// reported next to the enqueue result and never turns a call into an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImmediateEmail {
    NotAttempted,
    Sent { message_id: String },
    Failed { reason: String },
}

impl ImmediateEmail {
    pub fn was_attempted(&self) -> bool {
        !matches!(self, ImmediateEmail::NotAttempted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub queue: QueueKind,
    pub message_id: String,
    pub immediate_email: ImmediateEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemFailure {
    pub index: usize,
    pub recipient: String,
    pub reason: String,
}

/// Every item yields a notification, failed deliveries included; `failures`
/// lists the items whose delivery or persistence did not succeed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkSendOutcome {
    pub notifications: Vec<Notification>,
    pub failures: Vec<BulkItemFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub received: usize,
    pub processed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub delete_failures: usize,
    pub skipped: usize,
}
