use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    clients::queue::{MessageAttributes, MessageQueue, QueueSet, ReceivedMessage},
    error::{NotificationError, NotificationResult},
    models::{
        dispatch::ProcessReport,
        message::{DeadLetterMessage, QueueKind},
    },
};

/// Work done for one queue message. An error leaves the message on the queue
/// for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, kind: QueueKind, message: &ReceivedMessage) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound on messages taken per receive.
    pub batch_size: usize,
    /// Long-poll window of a receive.
    pub wait: Duration,
    /// Receive count at which a failing message is quarantined. `None` keeps
    /// failing messages on their queue indefinitely.
    pub dead_letter_after: Option<u32>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait: Duration::from_secs(10),
            dead_letter_after: None,
        }
    }
}

/// Polls one queue per call and acknowledges what its handler accepts.
pub struct QueueProcessor {
    queues: QueueSet,
    handler: Arc<dyn MessageHandler>,
    config: ProcessorConfig,
    dead_letter: Option<Arc<dyn MessageQueue>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl QueueProcessor {
    pub fn new(queues: QueueSet, handler: Arc<dyn MessageHandler>, config: ProcessorConfig) -> Self {
        Self {
            queues,
            handler,
            config,
            dead_letter: None,
            shutdown: None,
        }
    }

    /// Quarantine target for messages reaching `dead_letter_after` receives.
    pub fn with_dead_letter_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    /// Once the flag flips to `true`, the rest of the current batch is skipped.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Receives a single batch from `queue_type` and hands each message to the
    /// handler. Does not loop until the queue drains.
    pub async fn process_queue(&self, queue_type: &str) -> NotificationResult<ProcessReport> {
        let kind: QueueKind = queue_type.parse()?;
        let queue = self.queues.get(kind);

        let messages = queue
            .receive(self.config.batch_size, self.config.wait)
            .await
            .map_err(NotificationError::Queue)?;

        let mut report = ProcessReport {
            received: messages.len(),
            ..Default::default()
        };

        if messages.is_empty() {
            debug!(queue = %kind, "No messages received");
            return Ok(report);
        }

        info!(queue = %kind, count = messages.len(), "Processing messages");

        for (position, message) in messages.iter().enumerate() {
            if self.shutting_down() {
                report.skipped = messages.len() - position;
                warn!(queue = %kind, skipped = report.skipped, "Shutdown requested, leaving remaining messages");
                break;
            }

            match self.handler.handle(kind, message).await {
                Ok(()) => {
                    report.processed += 1;
                    self.acknowledge(queue, kind, message, &mut report).await;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        queue = %kind,
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        error = %e,
                        "Message processing failed"
                    );

                    if self.should_dead_letter(message) {
                        self.quarantine(queue, kind, message, &e, &mut report).await;
                    }
                }
            }
        }

        info!(
            queue = %kind,
            processed = report.processed,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            "Batch processed"
        );

        Ok(report)
    }

    fn should_dead_letter(&self, message: &ReceivedMessage) -> bool {
        match (self.config.dead_letter_after, &self.dead_letter) {
            (Some(limit), Some(_)) => message.receive_count >= limit,
            _ => false,
        }
    }

    async fn acknowledge(
        &self,
        queue: &Arc<dyn MessageQueue>,
        kind: QueueKind,
        message: &ReceivedMessage,
        report: &mut ProcessReport,
    ) {
        if let Err(e) = queue.delete(&message.receipt).await {
            report.delete_failures += 1;
            error!(
                queue = %kind,
                message_id = %message.message_id,
                error = %e,
                "Failed to delete processed message"
            );
        }
    }

    async fn quarantine(
        &self,
        queue: &Arc<dyn MessageQueue>,
        kind: QueueKind,
        message: &ReceivedMessage,
        failure: &Error,
        report: &mut ProcessReport,
    ) {
        let Some(dead_letter) = &self.dead_letter else {
            return;
        };

        let envelope = DeadLetterMessage {
            source_queue: kind,
            message_id: message.message_id.clone(),
            original_body: message.body.clone(),
            failure_reason: failure.to_string(),
            receive_count: message.receive_count,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let body = match serde_json::to_string(&envelope) {
            Ok(body) => body,
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "Failed to encode dead letter");
                return;
            }
        };

        let mut attributes = MessageAttributes::new();
        attributes.insert("SourceQueue".to_string(), kind.to_string());

        if let Err(e) = dead_letter.send(&body, &attributes).await {
            error!(
                queue = %kind,
                message_id = %message.message_id,
                error = %e,
                "Failed to publish dead letter, message stays on its queue"
            );
            return;
        }

        report.dead_lettered += 1;
        warn!(
            queue = %kind,
            message_id = %message.message_id,
            receive_count = message.receive_count,
            "Message moved to dead-letter queue"
        );

        self.acknowledge(queue, kind, message, report).await;
    }
}
