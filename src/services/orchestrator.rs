use std::sync::Arc;

use anyhow::{Error, anyhow};
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        email::EmailTransport,
        queue::{MessageAttributes, QueueAttributes, QueueSet},
    },
    error::{NotificationError, NotificationResult},
    models::{
        dispatch::{BulkItemFailure, BulkSendOutcome, DispatchOutcome, ImmediateEmail},
        email::OutboundEmail,
        message::{
            EVENT_CANCELLED_TEMPLATE, EVENT_CREATED_TEMPLATE, EventNotificationMessage, QueueKind,
            RESERVATION_CANCELLED_TEMPLATE, RESERVATION_CONFIRMED_TEMPLATE,
            RESERVATION_CREATED_TEMPLATE, ReminderMessage, ReservationNotificationMessage,
        },
        notification::{
            BulkNotificationRequest, CreateNotificationRequest, EventNotification, Notification,
            NotificationType, ReservationNotification,
        },
    },
    services::content,
};

/// Namespace for notification ids derived from queue message ids.
const QUEUED_NOTIFICATION_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a3e_8d41_4b7a_9e62_1c7d_3b90_a4e5);

/// Result of one delivery attempt. The notification is always produced;
/// `error` explains a `failed` status.
#[derive(Debug)]
pub struct Delivery {
    pub notification: Notification,
    pub error: Option<Error>,
}

/// When an enqueue is accompanied by a direct email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImmediatePolicy {
    Never,
    Always,
    ElevatedPriority,
}

impl ImmediatePolicy {
    fn applies(&self, elevated: bool) -> bool {
        match self {
            ImmediatePolicy::Never => false,
            ImmediatePolicy::Always => true,
            ImmediatePolicy::ElevatedPriority => elevated,
        }
    }
}

/// Turns domain requests into email sends and queue messages.
///
/// Holds only shared client handles, so one instance serves concurrent callers.
/// Persisting what it produces is left to the caller.
#[derive(Clone)]
pub struct NotificationOrchestrator {
    email: Arc<dyn EmailTransport>,
    queues: QueueSet,
    sender: String,
    bulk_concurrency: usize,
}

impl NotificationOrchestrator {
    pub fn new(email: Arc<dyn EmailTransport>, queues: QueueSet, sender: impl Into<String>) -> Self {
        Self {
            email,
            queues,
            sender: sender.into(),
            bulk_concurrency: 1,
        }
    }

    /// Items of a bulk send in flight at once. Values below 1 mean 1.
    pub fn with_bulk_concurrency(mut self, bulk_concurrency: usize) -> Self {
        self.bulk_concurrency = bulk_concurrency.max(1);
        self
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    /// Delivers `request` by email. Never fails: a delivery error shows up as
    /// a `failed` status on the returned notification.
    pub async fn send_notification(&self, request: CreateNotificationRequest) -> Notification {
        self.deliver(Uuid::new_v4(), request, None).await.notification
    }

    /// Like [`send_notification`](Self::send_notification), but the id is
    /// derived from `message_key` so redelivering the same queue message
    /// yields the same notification id. `created_at` carries the timestamp of
    /// an earlier attempt so a retry keeps the record's creation time.
    pub async fn deliver_queued(
        &self,
        message_key: &str,
        request: CreateNotificationRequest,
        created_at: Option<DateTime<Utc>>,
    ) -> Delivery {
        self.deliver(self.queued_notification_id(message_key), request, created_at)
            .await
    }

    pub fn queued_notification_id(&self, message_key: &str) -> Uuid {
        Uuid::new_v5(&QUEUED_NOTIFICATION_NAMESPACE, message_key.as_bytes())
    }

    async fn deliver(
        &self,
        id: Uuid,
        request: CreateNotificationRequest,
        created_at: Option<DateTime<Utc>>,
    ) -> Delivery {
        let mut notification = Notification::pending(id, request, Utc::now());
        if let Some(created_at) = created_at {
            notification.created_at = created_at.min(notification.created_at);
        }

        match self.send_email_notification(&notification).await {
            Ok(message_id) => {
                notification.mark_sent(Utc::now());
                debug!(
                    notification_id = %notification.id,
                    message_id = %message_id,
                    "Notification delivered"
                );
                Delivery {
                    notification,
                    error: None,
                }
            }
            Err(e) => {
                notification.mark_failed(Utc::now());
                warn!(
                    notification_id = %notification.id,
                    recipient = %notification.recipient,
                    error = %e,
                    "Notification delivery failed"
                );
                Delivery {
                    notification,
                    error: Some(e),
                }
            }
        }
    }

    /// Sends every item of `batch` after applying the batch-level overrides.
    /// Item failures are collected, never abort the batch.
    pub async fn send_bulk_notifications(&self, batch: BulkNotificationRequest) -> BulkSendOutcome {
        let items = batch.into_items();
        let total = items.len();

        let deliveries: Vec<(usize, String, Delivery)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move {
                let recipient = item.recipient.clone();
                (index, recipient, self.deliver(Uuid::new_v4(), item, None).await)
            })
            .buffered(self.bulk_concurrency)
            .collect()
            .await;

        let mut outcome = BulkSendOutcome::default();
        for (index, recipient, delivery) in deliveries {
            if let Some(e) = delivery.error {
                warn!(index, recipient = %recipient, error = %e, "Bulk item failed");
                outcome.failures.push(BulkItemFailure {
                    index,
                    recipient,
                    reason: e.to_string(),
                });
            }
            outcome.notifications.push(delivery.notification);
        }

        info!(
            total,
            failed = outcome.failures.len(),
            "Bulk notification send completed"
        );

        outcome
    }

    pub async fn notify_event_created(&self, event: &EventNotification) -> NotificationResult<DispatchOutcome> {
        self.dispatch_event(event, EVENT_CREATED_TEMPLATE, ImmediatePolicy::ElevatedPriority)
            .await
    }

    /// Cancellations are always emailed immediately, whatever their priority.
    pub async fn notify_event_cancelled(&self, event: &EventNotification) -> NotificationResult<DispatchOutcome> {
        self.dispatch_event(event, EVENT_CANCELLED_TEMPLATE, ImmediatePolicy::Always)
            .await
    }

    pub async fn send_event_reminder(&self, event: &EventNotification) -> NotificationResult<DispatchOutcome> {
        event.validate()?;

        let message = ReminderMessage::from_event(event);
        let mut attributes = MessageAttributes::new();
        attributes.insert("Type".to_string(), "reminder".to_string());
        attributes.insert("EventID".to_string(), message.event_id.clone());
        attributes.insert("ReminderType".to_string(), message.reminder_type.clone());

        let message_id = self.enqueue(QueueKind::Reminders, &message, attributes).await?;

        Ok(DispatchOutcome {
            queue: QueueKind::Reminders,
            message_id,
            immediate_email: ImmediateEmail::NotAttempted,
        })
    }

    pub async fn notify_reservation_created(
        &self,
        reservation: &ReservationNotification,
    ) -> NotificationResult<DispatchOutcome> {
        self.dispatch_reservation(reservation, RESERVATION_CREATED_TEMPLATE, ImmediatePolicy::Always)
            .await
    }

    pub async fn notify_reservation_confirmed(
        &self,
        reservation: &ReservationNotification,
    ) -> NotificationResult<DispatchOutcome> {
        self.dispatch_reservation(reservation, RESERVATION_CONFIRMED_TEMPLATE, ImmediatePolicy::Never)
            .await
    }

    pub async fn notify_reservation_cancelled(
        &self,
        reservation: &ReservationNotification,
    ) -> NotificationResult<DispatchOutcome> {
        self.dispatch_reservation(reservation, RESERVATION_CANCELLED_TEMPLATE, ImmediatePolicy::Always)
            .await
    }

    async fn dispatch_event(
        &self,
        event: &EventNotification,
        template_id: &str,
        policy: ImmediatePolicy,
    ) -> NotificationResult<DispatchOutcome> {
        event.validate()?;

        let message = EventNotificationMessage::from_event(event, template_id);
        let mut attributes = MessageAttributes::new();
        attributes.insert("Type".to_string(), "event_notification".to_string());
        attributes.insert("EventID".to_string(), message.event_id.clone());
        attributes.insert("Priority".to_string(), message.priority.clone());

        let message_id = self.enqueue(QueueKind::Events, &message, attributes).await?;

        let immediate_email = if policy.applies(event.priority.is_elevated()) {
            let rendered_as =
                content::event_template_type(template_id).unwrap_or(NotificationType::EventCreated);
            let date = content::display_date(&event.event_date);
            let request = CreateNotificationRequest::new(
                event.notification_type,
                &event.recipient,
                content::event_subject(rendered_as, &event.event_name),
                content::event_body(rendered_as, &event.event_name, &event.location, &date),
            )
            .with_priority(event.priority)
            .with_template(template_id);

            self.send_immediate(request).await
        } else {
            ImmediateEmail::NotAttempted
        };

        Ok(DispatchOutcome {
            queue: QueueKind::Events,
            message_id,
            immediate_email,
        })
    }

    async fn dispatch_reservation(
        &self,
        reservation: &ReservationNotification,
        template_id: &str,
        policy: ImmediatePolicy,
    ) -> NotificationResult<DispatchOutcome> {
        reservation.validate()?;

        let message = ReservationNotificationMessage::from_reservation(reservation, template_id);
        let mut attributes = MessageAttributes::new();
        attributes.insert("Type".to_string(), "reservation_notification".to_string());
        attributes.insert("ReservationID".to_string(), message.reservation_id.clone());
        attributes.insert("Priority".to_string(), message.priority.clone());

        let message_id = self
            .enqueue(QueueKind::Reservations, &message, attributes)
            .await?;

        let immediate_email = if policy.applies(reservation.priority.is_elevated()) {
            let rendered_as = content::reservation_template_type(template_id)
                .unwrap_or(NotificationType::ReservationCreated);
            let date = content::display_date(&reservation.event_date);
            let request = CreateNotificationRequest::new(
                reservation.notification_type,
                &reservation.recipient,
                content::reservation_subject(rendered_as, &reservation.event_name),
                content::reservation_body(
                    rendered_as,
                    &reservation.event_name,
                    &reservation.location,
                    &date,
                    &reservation.reservation_id,
                ),
            )
            .with_priority(reservation.priority)
            .with_template(template_id);

            self.send_immediate(request).await
        } else {
            ImmediateEmail::NotAttempted
        };

        Ok(DispatchOutcome {
            queue: QueueKind::Reservations,
            message_id,
            immediate_email,
        })
    }

    /// Best-effort email next to a successful enqueue. Failures are logged and
    /// reported in the outcome, never returned as errors.
    async fn send_immediate(&self, request: CreateNotificationRequest) -> ImmediateEmail {
        let notification = Notification::pending(Uuid::new_v4(), request, Utc::now());

        match self.send_email_notification(&notification).await {
            Ok(message_id) => ImmediateEmail::Sent { message_id },
            Err(e) => {
                warn!(
                    notification_type = %notification.notification_type,
                    recipient = %notification.recipient,
                    error = %e,
                    "Immediate email failed; the queued message is unaffected"
                );
                ImmediateEmail::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn enqueue<T: Serialize>(
        &self,
        kind: QueueKind,
        message: &T,
        attributes: MessageAttributes,
    ) -> NotificationResult<String> {
        let body = serde_json::to_string(message)?;

        let message_id = self
            .queues
            .get(kind)
            .send(&body, &attributes)
            .await
            .map_err(|source| NotificationError::Enqueue { queue: kind, source })?;

        info!(queue = %kind, message_id = %message_id, "Message enqueued");
        Ok(message_id)
    }

    /// Single-recipient plain-text email for `notification`; transport errors
    /// are returned to the caller.
    pub async fn send_email_notification(&self, notification: &Notification) -> Result<String, Error> {
        if notification.recipient.trim().is_empty() {
            return Err(anyhow!("notification {} has no recipient", notification.id));
        }

        let email = OutboundEmail {
            from: self.sender.clone(),
            to: notification.recipient.clone(),
            subject: notification.subject.clone(),
            body_text: notification.content.clone(),
        };

        let message_id = self.email.send(&email).await?;
        info!(
            recipient = %notification.recipient,
            transport = self.email.name(),
            "Email notification sent"
        );

        Ok(message_id)
    }

    /// Depth of every queue. A queue that cannot be inspected reports its
    /// error without hiding the others.
    pub async fn queue_status(&self) -> Vec<(QueueKind, NotificationResult<QueueAttributes>)> {
        let mut status = Vec::with_capacity(QueueKind::ALL.len());

        for kind in QueueKind::ALL {
            let attributes = self
                .queues
                .get(kind)
                .attributes()
                .await
                .map_err(NotificationError::Queue);
            status.push((kind, attributes));
        }

        status
    }

    pub async fn purge_queue(&self, queue_type: &str) -> NotificationResult<u64> {
        let kind: QueueKind = queue_type.parse()?;

        let purged = self
            .queues
            .get(kind)
            .purge()
            .await
            .map_err(NotificationError::Queue)?;

        info!(queue = %kind, purged, "Queue purged");
        Ok(purged)
    }
}
