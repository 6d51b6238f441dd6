use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::queue::ReceivedMessage,
    error::{NotificationError, NotificationResult},
    models::{
        dispatch::{BulkItemFailure, BulkSendOutcome},
        message::{EventNotificationMessage, QueueKind, ReminderMessage, ReservationNotificationMessage},
        notification::{
            BulkNotificationRequest, CreateNotificationRequest, DataBag, DataValue, Notification,
            NotificationPriority, NotificationStatus, NotificationType, NotificationUpdate,
        },
    },
    repository::NotificationRepository,
    services::{content, orchestrator::NotificationOrchestrator, processor::MessageHandler},
};

/// Delivers queued messages by email and records the outcome.
pub struct DeliveryHandler {
    orchestrator: NotificationOrchestrator,
    repository: NotificationRepository,
}

impl DeliveryHandler {
    pub fn new(orchestrator: NotificationOrchestrator, repository: NotificationRepository) -> Self {
        Self {
            orchestrator,
            repository,
        }
    }

    fn build_request(kind: QueueKind, body: &str) -> Result<CreateNotificationRequest, Error> {
        match kind {
            QueueKind::Events => {
                let message: EventNotificationMessage = serde_json::from_str(body)?;
                let notification_type: NotificationType = wire_enum("type", &message.notification_type)?;
                let rendered_as = content::event_template_type(&message.template_id).unwrap_or(notification_type);
                let date = content::display_wire_date(&message.event_date);

                let mut data = DataBag::new();
                data.insert("event_id".to_string(), DataValue::from(message.event_id.as_str()));
                data.insert("event_name".to_string(), DataValue::from(message.event_name.as_str()));
                data.insert("event_date".to_string(), DataValue::from(message.event_date.as_str()));
                data.insert("location".to_string(), DataValue::from(message.location.as_str()));

                Ok(CreateNotificationRequest::new(
                    notification_type,
                    message.recipient,
                    content::event_subject(rendered_as, &message.event_name),
                    content::event_body(rendered_as, &message.event_name, &message.location, &date),
                )
                .with_priority(wire_priority(&message.priority)?)
                .with_template(message.template_id)
                .with_data(data))
            }
            QueueKind::Reservations => {
                let message: ReservationNotificationMessage = serde_json::from_str(body)?;
                let notification_type: NotificationType = wire_enum("type", &message.notification_type)?;
                let rendered_as =
                    content::reservation_template_type(&message.template_id).unwrap_or(notification_type);
                let date = content::display_wire_date(&message.event_date);

                let mut data = DataBag::new();
                data.insert("reservation_id".to_string(), DataValue::from(message.reservation_id.as_str()));
                data.insert("event_id".to_string(), DataValue::from(message.event_id.as_str()));
                data.insert("event_name".to_string(), DataValue::from(message.event_name.as_str()));
                data.insert("event_date".to_string(), DataValue::from(message.event_date.as_str()));
                data.insert("location".to_string(), DataValue::from(message.location.as_str()));

                Ok(CreateNotificationRequest::new(
                    notification_type,
                    message.recipient,
                    content::reservation_subject(rendered_as, &message.event_name),
                    content::reservation_body(
                        rendered_as,
                        &message.event_name,
                        &message.location,
                        &date,
                        &message.reservation_id,
                    ),
                )
                .with_priority(wire_priority(&message.priority)?)
                .with_template(message.template_id)
                .with_data(data))
            }
            QueueKind::Reminders => {
                let message: ReminderMessage = serde_json::from_str(body)?;
                let date = content::display_wire_date(&message.event_date);

                let mut data = DataBag::new();
                data.insert("event_id".to_string(), DataValue::from(message.event_id.as_str()));
                data.insert("event_name".to_string(), DataValue::from(message.event_name.as_str()));
                data.insert("event_date".to_string(), DataValue::from(message.event_date.as_str()));
                data.insert("location".to_string(), DataValue::from(message.location.as_str()));
                data.insert("reminder_type".to_string(), DataValue::from(message.reminder_type.as_str()));

                Ok(CreateNotificationRequest::new(
                    NotificationType::EventReminder,
                    message.recipient,
                    content::event_subject(NotificationType::EventReminder, &message.event_name),
                    content::reminder_body(&message.event_name, &message.location, &date),
                )
                .with_template(message.template_id)
                .with_data(data))
            }
        }
    }
}

fn wire_enum<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, Error> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| anyhow!("unknown {} '{}'", field, value))
}

fn wire_priority(value: &str) -> Result<NotificationPriority, Error> {
    if value.is_empty() {
        return Ok(NotificationPriority::default());
    }
    wire_enum("priority", value)
}

#[async_trait]
impl MessageHandler for DeliveryHandler {
    async fn handle(&self, kind: QueueKind, message: &ReceivedMessage) -> Result<(), Error> {
        let id = self.orchestrator.queued_notification_id(&message.message_id);

        // A delivery that succeeded before its message was acknowledged is not repeated.
        let created_at = match self.repository.get_notification(id).await {
            Ok(existing)
                if matches!(
                    existing.status,
                    NotificationStatus::Sent | NotificationStatus::Delivered | NotificationStatus::Read
                ) =>
            {
                info!(
                    queue = %kind,
                    message_id = %message.message_id,
                    notification_id = %id,
                    "Message already delivered, acknowledging"
                );
                return Ok(());
            }
            Ok(existing) => Some(existing.created_at),
            Err(NotificationError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let request = Self::build_request(kind, &message.body)
            .map_err(|e| anyhow!("malformed {} message: {}", kind, e))?;

        let delivery = self
            .orchestrator
            .deliver_queued(&message.message_id, request, created_at)
            .await;

        self.repository.save_notification(&delivery.notification).await?;

        debug!(
            queue = %kind,
            notification_id = %delivery.notification.id,
            status = %delivery.notification.status,
            "Queued notification recorded"
        );

        match delivery.error {
            Some(e) => Err(e.context(format!("delivery of notification {} failed", delivery.notification.id))),
            None => Ok(()),
        }
    }
}

/// Request-level entry point: every notification it sends is also persisted.
///
/// A persistence failure is an error ("the record was not created"); a
/// delivery failure is a stored notification with status `failed`.
pub struct NotificationDesk {
    orchestrator: NotificationOrchestrator,
    repository: NotificationRepository,
}

impl NotificationDesk {
    pub fn new(orchestrator: NotificationOrchestrator, repository: NotificationRepository) -> Self {
        Self {
            orchestrator,
            repository,
        }
    }

    pub async fn send_notification(&self, request: CreateNotificationRequest) -> NotificationResult<Notification> {
        request.validate()?;

        let notification = self.orchestrator.send_notification(request).await;
        self.repository.save_notification(&notification).await?;

        info!(
            notification_id = %notification.id,
            status = %notification.status,
            "Notification processed"
        );

        Ok(notification)
    }

    /// Sends and stores a batch. Invalid items reject the whole batch before
    /// anything is sent; delivery and storage failures are reported per item.
    pub async fn send_bulk(&self, batch: BulkNotificationRequest) -> NotificationResult<BulkSendOutcome> {
        if batch.notifications.is_empty() {
            return Err(NotificationError::Validation(
                "at least one notification is required".to_string(),
            ));
        }

        for (index, item) in batch.notifications.iter().enumerate() {
            item.validate().map_err(|e| match e {
                NotificationError::Validation(reason) => {
                    NotificationError::Validation(format!("item {}: {}", index, reason))
                }
                other => other,
            })?;
        }

        let mut outcome = self.orchestrator.send_bulk_notifications(batch).await;

        for (index, notification) in outcome.notifications.iter().enumerate() {
            if let Err(e) = self.repository.save_notification(notification).await {
                warn!(
                    index,
                    notification_id = %notification.id,
                    error = %e,
                    "Failed to store bulk notification"
                );
                outcome.failures.push(BulkItemFailure {
                    index,
                    recipient: notification.recipient.clone(),
                    reason: format!("not stored: {}", e),
                });
            }
        }

        outcome.failures.sort_by_key(|failure| failure.index);

        Ok(outcome)
    }

    pub async fn get(&self, id: Uuid) -> NotificationResult<Notification> {
        self.repository.get_notification(id).await
    }

    pub async fn list(
        &self,
        recipient: Option<&str>,
        notification_type: Option<NotificationType>,
        limit: usize,
    ) -> NotificationResult<Vec<Notification>> {
        self.repository
            .list_notifications(recipient, notification_type, limit)
            .await
    }

    pub async fn update(&self, id: Uuid, update: &NotificationUpdate) -> NotificationResult<Notification> {
        self.repository.update_notification(id, update).await
    }

    pub async fn delete(&self, id: Uuid) -> NotificationResult<()> {
        self.repository.delete_notification(id).await
    }
}
