use crate::models::{message::QueueKind, notification::NotificationStatus};

pub type NotificationResult<T> = Result<T, NotificationError>;

/// Record store failures, classified so callers can act on them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection '{0}' does not exist in the record store; create it before writing")]
    CollectionNotFound(String),

    #[error("cannot reach the record store, check that it is running: {0}")]
    Connectivity(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("stored item could not be encoded or decoded: {0}")]
    Serialization(String),

    #[error("record store error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid queue type '{0}', expected events, reservations or reminders")]
    InvalidQueueType(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error("{collection} record '{id}' not found")]
    NotFound { collection: String, id: String },

    #[error("failed to enqueue on the {queue} queue: {source}")]
    Enqueue {
        queue: QueueKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("queue operation failed: {0}")]
    Queue(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotificationError {
    /// True for errors raised before any side effect took place.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NotificationError::Validation(_)
                | NotificationError::InvalidQueueType(_)
                | NotificationError::InvalidTransition { .. }
        )
    }
}
