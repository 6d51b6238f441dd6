use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use ticket_notifications::{
    clients::{
        memory::{InMemoryRecordStore, MockEmailTransport},
        store::{Collection, Item, RecordStore},
    },
    error::{NotificationError, StoreError},
    models::notification::{
        BulkNotificationRequest, CreateNotificationRequest, NotificationStatus, NotificationType,
        NotificationUpdate,
    },
};
use tokio_test::assert_err;
use uuid::Uuid;

use crate::common::Harness;

fn payment(recipient: &str) -> CreateNotificationRequest {
    CreateNotificationRequest::new(
        NotificationType::PaymentReceived,
        recipient,
        "Payment received",
        "We received your payment.",
    )
}

fn as_item(value: Value) -> Item {
    match value {
        Value::Object(item) => item,
        other => panic!("not an object: {}", other),
    }
}

fn updated_at(item: &Item) -> DateTime<Utc> {
    item["updated_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .expect("updated_at is an RFC 3339 timestamp")
}

#[tokio::test]
async fn sent_notification_is_persisted() -> Result<()> {
    let harness = Harness::new();
    let desk = harness.desk();

    let notification = desk.send_notification(payment("ana@example.com")).await?;

    let stored = desk.get(notification.id).await?;
    assert_eq!(stored, notification);
    assert_eq!(stored.status, NotificationStatus::Sent);

    Ok(())
}

#[tokio::test]
async fn failed_delivery_is_still_persisted() -> Result<()> {
    let harness = Harness::with_email(MockEmailTransport::failing("mail api down"));
    let desk = harness.desk();

    let notification = desk.send_notification(payment("ana@example.com")).await?;

    assert_eq!(notification.status, NotificationStatus::Failed);
    assert_eq!(desk.get(notification.id).await?.status, NotificationStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn missing_required_field_is_rejected_before_sending() {
    let harness = Harness::new();
    let desk = harness.desk();

    let mut request = payment("ana@example.com");
    request.subject = "  ".to_string();

    let err = assert_err!(desk.send_notification(request).await);
    assert!(err.is_validation());
    assert_eq!(harness.email.attempt_count(), 0);
    assert_eq!(harness.store.len(Collection::Notifications).await, 0);
}

#[tokio::test]
async fn missing_collection_is_reported_as_not_created() {
    let harness = Harness::build(
        MockEmailTransport::new(),
        InMemoryRecordStore::without_collection(Collection::Notifications),
    );

    let err = assert_err!(harness.desk().send_notification(payment("ana@example.com")).await);

    assert!(matches!(err, NotificationError::Store(StoreError::CollectionNotFound(_))));
    assert!(err.to_string().contains("create it before writing"));
}

#[tokio::test]
async fn bulk_send_persists_every_notification() -> Result<()> {
    let harness = Harness::with_email(MockEmailTransport::failing_for(["b@example.com"]));
    let desk = harness.desk();

    let batch = BulkNotificationRequest {
        notifications: vec![payment("a@example.com"), payment("b@example.com"), payment("c@example.com")],
        template_id: None,
        priority: None,
    };

    let outcome = desk.send_bulk(batch).await?;

    assert_eq!(outcome.notifications.len(), 3);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 1);
    assert_eq!(harness.store.len(Collection::Notifications).await, 3);

    Ok(())
}

#[tokio::test]
async fn bulk_with_invalid_item_sends_nothing() {
    let harness = Harness::new();

    let batch = BulkNotificationRequest {
        notifications: vec![payment("a@example.com"), payment("")],
        template_id: None,
        priority: None,
    };

    let err = assert_err!(harness.desk().send_bulk(batch).await);

    assert!(matches!(err, NotificationError::Validation(ref reason) if reason.starts_with("item 1")));
    assert_eq!(harness.email.attempt_count(), 0);
}

#[tokio::test]
async fn bulk_persist_failures_are_aggregated() -> Result<()> {
    let harness = Harness::new();
    harness.store.set_unavailable(true).await;

    let batch = BulkNotificationRequest {
        notifications: vec![payment("a@example.com"), payment("b@example.com")],
        template_id: None,
        priority: None,
    };

    let outcome = harness.desk().send_bulk(batch).await?;

    assert_eq!(outcome.notifications.len(), 2);
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.failures.iter().all(|f| f.reason.starts_with("not stored")));
    assert_eq!(harness.email.attempt_count(), 2);

    Ok(())
}

#[tokio::test]
async fn read_receipt_flow() -> Result<()> {
    let harness = Harness::new();
    let desk = harness.desk();
    let notification = desk.send_notification(payment("ana@example.com")).await?;

    let delivered = desk
        .update(notification.id, &NotificationUpdate::status(NotificationStatus::Delivered))
        .await?;
    assert_eq!(delivered.status, NotificationStatus::Delivered);
    assert!(delivered.read_at.is_none());

    let read = desk
        .update(notification.id, &NotificationUpdate::status(NotificationStatus::Read))
        .await?;
    assert_eq!(read.status, NotificationStatus::Read);
    assert!(read.read_at.is_some());
    assert_eq!(read.sent_at, notification.sent_at);

    let listed = desk.list(Some("ana@example.com"), Some(NotificationType::PaymentReceived), 10).await?;
    assert_eq!(listed.len(), 1);

    desk.delete(notification.id).await?;
    let err = assert_err!(desk.get(notification.id).await);
    assert!(matches!(err, NotificationError::NotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn updating_unknown_notification_is_not_found() {
    let harness = Harness::new();

    let err = assert_err!(
        harness
            .desk()
            .update(Uuid::new_v4(), &NotificationUpdate::status(NotificationStatus::Read))
            .await
    );

    assert!(matches!(err, NotificationError::NotFound { .. }));
}

#[tokio::test]
async fn repeated_put_and_update_only_advance_updated_at() -> Result<()> {
    let store = InMemoryRecordStore::new();
    let item = as_item(json!({
        "id": "n-1",
        "status": "sent",
        "recipient": "ana@example.com",
        "updated_at": "2026-01-01T00:00:00Z"
    }));

    store.put(Collection::Notifications, item.clone()).await?;
    store.put(Collection::Notifications, item.clone()).await?;
    let after_puts = store.get(Collection::Notifications, "n-1").await?.expect("stored");
    assert_eq!(after_puts, item);

    let fields = as_item(json!({ "status": "read" }));
    store.update(Collection::Notifications, "n-1", fields.clone()).await?;
    let first = store.get(Collection::Notifications, "n-1").await?.expect("stored");
    store.update(Collection::Notifications, "n-1", fields).await?;
    let second = store.get(Collection::Notifications, "n-1").await?.expect("stored");

    assert!(updated_at(&first) <= updated_at(&second));
    assert!(updated_at(&item) <= updated_at(&first));

    let strip = |mut item: Item| {
        item.remove("updated_at");
        item
    };
    assert_eq!(strip(first), strip(second));

    Ok(())
}
