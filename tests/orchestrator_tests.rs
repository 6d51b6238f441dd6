use anyhow::Result;
use ticket_notifications::{
    clients::memory::MockEmailTransport,
    error::NotificationError,
    models::{
        dispatch::ImmediateEmail,
        message::{EventNotificationMessage, QueueKind, ReminderMessage, ReservationNotificationMessage},
        notification::{
            BulkNotificationRequest, CreateNotificationRequest, NotificationPriority,
            NotificationStatus, NotificationType,
        },
    },
};
use tokio_test::{assert_err, assert_ok};

use crate::common::{Harness, event, reservation};

fn welcome(recipient: &str) -> CreateNotificationRequest {
    CreateNotificationRequest::new(NotificationType::Welcome, recipient, "Welcome aboard", "Hello!")
}

#[tokio::test]
async fn successful_send_is_marked_sent() {
    let harness = Harness::new();

    let notification = harness.orchestrator.send_notification(welcome("ana@example.com")).await;

    assert!(!notification.id.is_nil());
    assert_eq!(notification.status, NotificationStatus::Sent);
    assert!(notification.sent_at.is_some());
    assert!(notification.created_at <= notification.updated_at);
    assert_eq!(notification.priority, NotificationPriority::Normal);
    assert!(harness.email.was_sent_to("ana@example.com").await);
}

#[tokio::test]
async fn transport_failure_yields_failed_notification_without_error() {
    let harness = Harness::with_email(MockEmailTransport::failing("mail api down"));

    let notification = harness.orchestrator.send_notification(welcome("ana@example.com")).await;

    assert_eq!(notification.status, NotificationStatus::Failed);
    assert!(notification.sent_at.is_none());
    assert!(notification.created_at <= notification.updated_at);
    assert_eq!(harness.email.attempt_count(), 1);
}

#[tokio::test]
async fn every_send_gets_a_fresh_id() {
    let harness = Harness::new();

    let first = harness.orchestrator.send_notification(welcome("a@example.com")).await;
    let second = harness.orchestrator.send_notification(welcome("a@example.com")).await;

    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn bulk_send_isolates_item_failures() {
    let recipients = ["u1@example.com", "u2@example.com", "u3@example.com", "u4@example.com", "u5@example.com"];
    let harness = Harness::with_email(MockEmailTransport::failing_for([recipients[1], recipients[3]]));

    let batch = BulkNotificationRequest {
        notifications: recipients.iter().map(|r| welcome(r)).collect(),
        template_id: None,
        priority: None,
    };

    let outcome = harness.orchestrator.send_bulk_notifications(batch).await;

    assert_eq!(outcome.notifications.len(), recipients.len());
    for notification in &outcome.notifications {
        let expected = if notification.recipient == recipients[1] || notification.recipient == recipients[3] {
            NotificationStatus::Failed
        } else {
            NotificationStatus::Sent
        };
        assert_eq!(notification.status, expected, "recipient {}", notification.recipient);
    }

    let failed: Vec<usize> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![1, 3]);
    assert_eq!(harness.email.attempt_count(), recipients.len());
}

#[tokio::test]
async fn bulk_send_with_parallel_workers_keeps_the_contract() {
    let recipients: Vec<String> = (0..8).map(|n| format!("user{}@example.com", n)).collect();
    let harness = Harness::with_email(MockEmailTransport::failing_for(["user2@example.com"]));
    let orchestrator = harness.orchestrator.clone().with_bulk_concurrency(4);

    let batch = BulkNotificationRequest {
        notifications: recipients.iter().map(|r| welcome(r)).collect(),
        template_id: None,
        priority: None,
    };

    let outcome = orchestrator.send_bulk_notifications(batch).await;

    assert_eq!(outcome.notifications.len(), 8);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].recipient, "user2@example.com");
}

#[tokio::test]
async fn bulk_priority_overrides_item_priority() {
    let harness = Harness::new();

    let batch = BulkNotificationRequest {
        notifications: vec![
            welcome("a@example.com").with_priority(NotificationPriority::Low),
            welcome("b@example.com").with_priority(NotificationPriority::Low),
            welcome("c@example.com"),
        ],
        template_id: Some("welcome_v2".to_string()),
        priority: Some(NotificationPriority::Urgent),
    };

    let outcome = harness.orchestrator.send_bulk_notifications(batch).await;

    assert_eq!(outcome.notifications.len(), 3);
    for notification in outcome.notifications {
        assert_eq!(notification.priority, NotificationPriority::Urgent);
        assert_eq!(notification.template_id.as_deref(), Some("welcome_v2"));
    }
}

#[tokio::test]
async fn low_priority_event_created_only_enqueues() -> Result<()> {
    let harness = Harness::new();

    let outcome = harness
        .orchestrator
        .notify_event_created(&event(NotificationType::EventCreated, NotificationPriority::Low))
        .await?;

    assert_eq!(outcome.queue, QueueKind::Events);
    assert_eq!(outcome.immediate_email, ImmediateEmail::NotAttempted);
    assert_eq!(harness.events.sent_count().await, 1);
    assert_eq!(harness.email.attempt_count(), 0);

    Ok(())
}

#[tokio::test]
async fn urgent_event_created_enqueues_and_emails() -> Result<()> {
    let harness = Harness::new();

    let outcome = harness
        .orchestrator
        .notify_event_created(&event(NotificationType::EventCreated, NotificationPriority::Urgent))
        .await?;

    assert!(matches!(outcome.immediate_email, ImmediateEmail::Sent { .. }));
    assert_eq!(harness.events.sent_count().await, 1);
    assert_eq!(harness.email.attempt_count(), 1);

    let sent = harness.email.sent_emails().await;
    assert_eq!(sent[0].subject, "New Event: Jazz Night");
    assert!(sent[0].body_text.contains("03/11/2026 20:30"));

    let body = &harness.events.sent_bodies().await[0];
    let message: EventNotificationMessage = serde_json::from_str(body)?;
    assert_eq!(message.template_id, "event_created_template");
    assert_eq!(message.priority, "urgent");
    assert_eq!(message.event_date, "2026-11-03T20:30:00Z");

    Ok(())
}

#[tokio::test]
async fn immediate_email_failure_does_not_fail_the_call() {
    let harness = Harness::with_email(MockEmailTransport::failing("mail api down"));

    let outcome = assert_ok!(
        harness
            .orchestrator
            .notify_event_created(&event(NotificationType::EventCreated, NotificationPriority::High))
            .await
    );

    assert!(matches!(outcome.immediate_email, ImmediateEmail::Failed { ref reason } if reason.contains("mail api down")));
    assert_eq!(harness.events.sent_count().await, 1);
    assert_eq!(harness.email.attempt_count(), 1);
}

#[tokio::test]
async fn event_cancelled_always_emails() -> Result<()> {
    for priority in [
        NotificationPriority::Low,
        NotificationPriority::Normal,
        NotificationPriority::High,
        NotificationPriority::Urgent,
    ] {
        let harness = Harness::new();

        let outcome = harness
            .orchestrator
            .notify_event_cancelled(&event(NotificationType::EventCancelled, priority))
            .await?;

        assert!(outcome.immediate_email.was_attempted());
        assert_eq!(harness.events.sent_count().await, 1, "priority {}", priority);
        assert_eq!(harness.email.attempt_count(), 1, "priority {}", priority);

        let sent = harness.email.sent_emails().await;
        assert_eq!(sent[0].subject, "Event Cancelled: Jazz Night");
    }

    Ok(())
}

#[tokio::test]
async fn enqueue_failure_is_surfaced_and_skips_email() {
    let harness = Harness::new();
    harness.events.set_fail_sends(true).await;

    let err = assert_err!(
        harness
            .orchestrator
            .notify_event_cancelled(&event(NotificationType::EventCancelled, NotificationPriority::Normal))
            .await
    );

    assert!(matches!(err, NotificationError::Enqueue { queue: QueueKind::Events, .. }));
    assert_eq!(harness.email.attempt_count(), 0);
}

#[tokio::test]
async fn reminders_only_enqueue() -> Result<()> {
    let harness = Harness::new();

    let outcome = harness
        .orchestrator
        .send_event_reminder(&event(NotificationType::EventReminder, NotificationPriority::Urgent))
        .await?;

    assert_eq!(outcome.queue, QueueKind::Reminders);
    assert_eq!(harness.reminders.sent_count().await, 1);
    assert_eq!(harness.events.sent_count().await, 0);
    assert_eq!(harness.email.attempt_count(), 0);

    let message: ReminderMessage = serde_json::from_str(&harness.reminders.sent_bodies().await[0])?;
    assert_eq!(message.reminder_type, "event_reminder");
    assert_eq!(message.template_id, "event_reminder_template");

    Ok(())
}

#[tokio::test]
async fn reservation_routing_follows_the_table() -> Result<()> {
    let harness = Harness::new();
    let low = NotificationPriority::Low;

    let created = harness
        .orchestrator
        .notify_reservation_created(&reservation(NotificationType::ReservationCreated, low))
        .await?;
    assert!(created.immediate_email.was_attempted());

    let confirmed = harness
        .orchestrator
        .notify_reservation_confirmed(&reservation(NotificationType::ReservationConfirmed, low))
        .await?;
    assert_eq!(confirmed.immediate_email, ImmediateEmail::NotAttempted);

    let cancelled = harness
        .orchestrator
        .notify_reservation_cancelled(&reservation(NotificationType::ReservationCancelled, low))
        .await?;
    assert!(cancelled.immediate_email.was_attempted());

    assert_eq!(harness.reservations.sent_count().await, 3);
    assert_eq!(harness.email.attempt_count(), 2);

    let subjects: Vec<String> = harness
        .email
        .sent_emails()
        .await
        .into_iter()
        .map(|e| e.subject)
        .collect();
    assert_eq!(subjects, ["Reservation Confirmed: Jazz Night", "Reservation Cancelled: Jazz Night"]);

    let templates: Vec<String> = harness
        .reservations
        .sent_bodies()
        .await
        .iter()
        .map(|body| serde_json::from_str::<ReservationNotificationMessage>(body).map(|m| m.template_id))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        templates,
        [
            "reservation_created_template",
            "reservation_confirmed_template",
            "reservation_cancelled_template"
        ]
    );

    Ok(())
}

#[tokio::test]
async fn invalid_event_is_rejected_before_enqueue() {
    let harness = Harness::new();
    let mut invalid = event(NotificationType::EventCreated, NotificationPriority::Urgent);
    invalid.recipient = String::new();

    let err = assert_err!(harness.orchestrator.notify_event_created(&invalid).await);

    assert!(err.is_validation());
    assert_eq!(harness.queue_operations().await, 0);
    assert_eq!(harness.email.attempt_count(), 0);
}

#[tokio::test]
async fn queue_status_reports_each_queue() -> Result<()> {
    let harness = Harness::new();
    harness
        .orchestrator
        .send_event_reminder(&event(NotificationType::EventReminder, NotificationPriority::Normal))
        .await?;

    let status = harness.orchestrator.queue_status().await;

    assert_eq!(status.len(), 3);
    for (kind, attributes) in status {
        let attributes = attributes?;
        let expected = if kind == QueueKind::Reminders { 1 } else { 0 };
        assert_eq!(attributes.approx_visible, expected, "queue {}", kind);
    }

    Ok(())
}

#[tokio::test]
async fn purge_validates_queue_type() -> Result<()> {
    let harness = Harness::new();
    harness
        .orchestrator
        .send_event_reminder(&event(NotificationType::EventReminder, NotificationPriority::Normal))
        .await?;

    let err = assert_err!(harness.orchestrator.purge_queue("archive").await);
    assert!(matches!(err, NotificationError::InvalidQueueType(_)));

    assert_eq!(harness.orchestrator.purge_queue("reminders").await?, 1);
    assert_eq!(harness.reminders.visible_count().await, 0);

    Ok(())
}
