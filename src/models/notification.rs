use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    EventCreated,
    EventUpdated,
    EventCancelled,
    EventReminder,
    ReservationCreated,
    ReservationConfirmed,
    ReservationCancelled,
    TicketGenerated,
    PaymentReceived,
    PaymentFailed,
    Welcome,
    PasswordReset,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::EventCreated => "event_created",
            NotificationType::EventUpdated => "event_updated",
            NotificationType::EventCancelled => "event_cancelled",
            NotificationType::EventReminder => "event_reminder",
            NotificationType::ReservationCreated => "reservation_created",
            NotificationType::ReservationConfirmed => "reservation_confirmed",
            NotificationType::ReservationCancelled => "reservation_cancelled",
            NotificationType::TicketGenerated => "ticket_generated",
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::PaymentFailed => "payment_failed",
            NotificationType::Welcome => "welcome",
            NotificationType::PasswordReset => "password_reset",
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a notification.
///
/// ```text
/// pending   -> sending | sent | failed
/// sending   -> sent | failed
/// sent      -> delivered | read | failed
/// delivered -> read
/// failed    -> pending   (only while sent_at is unset)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Read => "read",
        }
    }

    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Sent)
                | (Pending, Failed)
                | (Sending, Sent)
                | (Sending, Failed)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Sent, Failed)
                | (Delivered, Read)
                | (Failed, Pending)
        )
    }

    /// States in which `sent_at` may be populated.
    pub fn allows_sent_at(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent
                | NotificationStatus::Delivered
                | NotificationStatus::Read
                | NotificationStatus::Failed
        )
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, NotificationPriority::High | NotificationPriority::Urgent)
    }
}

impl Display for NotificationPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Template substitution value. Lists are not substitutable. Numbers keep
/// their JSON form, so integers stay integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Map(BTreeMap<String, DataValue>),
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::String(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Number(value.into())
    }
}

impl From<f64> for DataValue {
    /// Non-finite values have no JSON form and become `Null`.
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(DataValue::Number)
            .unwrap_or(DataValue::Null)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

pub type DataBag = BTreeMap<String, DataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub priority: NotificationPriority,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub data: Option<DataBag>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn pending(id: Uuid, request: CreateNotificationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            notification_type: request.notification_type,
            status: NotificationStatus::Pending,
            priority: request.priority.unwrap_or_default(),
            recipient: request.recipient,
            subject: request.subject,
            content: request.content,
            template_id: request.template_id.filter(|t| !t.is_empty()),
            data: request.data,
            sent_at: None,
            read_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        self.updated_at = now.max(self.updated_at);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Failed;
        self.updated_at = now.max(self.updated_at);
    }

    /// Applies a status/timestamp update, enforcing the lifecycle rules.
    /// `sent_at` and `read_at` are set at most once and never cleared.
    pub fn apply_update(
        &mut self,
        update: &NotificationUpdate,
        now: DateTime<Utc>,
    ) -> NotificationResult<()> {
        let next = update.status.unwrap_or(self.status);

        if !self.status.can_transition_to(next) {
            return Err(NotificationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if self.sent_at.is_some() && !next.allows_sent_at() {
            return Err(NotificationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if update.sent_at.is_some() && !next.allows_sent_at() {
            return Err(NotificationError::Validation(format!(
                "sent_at cannot be set while status is {}",
                next
            )));
        }

        if update.read_at.is_some() && next != NotificationStatus::Read {
            return Err(NotificationError::Validation(format!(
                "read_at cannot be set while status is {}",
                next
            )));
        }

        self.status = next;

        if self.sent_at.is_none() {
            self.sent_at = match (update.sent_at, next) {
                (Some(at), _) => Some(at),
                (
                    None,
                    NotificationStatus::Sent
                    | NotificationStatus::Delivered
                    | NotificationStatus::Read,
                ) => Some(now),
                _ => None,
            };
        }

        if self.read_at.is_none() && next == NotificationStatus::Read {
            self.read_at = Some(update.read_at.unwrap_or(now));
        }

        self.updated_at = now.max(self.updated_at);

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Option<NotificationPriority>,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub data: Option<DataBag>,
}

impl CreateNotificationRequest {
    pub fn new(
        notification_type: NotificationType,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            priority: None,
            recipient: recipient.into(),
            subject: subject.into(),
            content: content.into(),
            template_id: None,
            data: None,
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_data(mut self, data: DataBag) -> Self {
        self.data = Some(data);
        self
    }

    pub fn validate(&self) -> NotificationResult<()> {
        require("recipient", &self.recipient)?;
        require("subject", &self.subject)?;
        require("content", &self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkNotificationRequest {
    pub notifications: Vec<CreateNotificationRequest>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub priority: Option<NotificationPriority>,
}

impl BulkNotificationRequest {
    /// Batch-level priority and template replace each item's own values.
    pub fn into_items(self) -> Vec<CreateNotificationRequest> {
        let priority = self.priority;
        let template_id = self.template_id.filter(|t| !t.is_empty());

        self.notifications
            .into_iter()
            .map(|mut item| {
                if let Some(priority) = priority {
                    item.priority = Some(priority);
                }
                if let Some(template_id) = &template_id {
                    item.template_id = Some(template_id.clone());
                }
                item
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationUpdate {
    #[serde(default)]
    pub status: Option<NotificationStatus>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl NotificationUpdate {
    pub fn status(status: NotificationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.sent_at.is_none() && self.read_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub event_id: String,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub location: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: NotificationPriority,
}

impl EventNotification {
    pub fn validate(&self) -> NotificationResult<()> {
        require("event_id", &self.event_id)?;
        require("event_name", &self.event_name)?;
        require("location", &self.location)?;
        require("recipient", &self.recipient)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationNotification {
    pub reservation_id: String,
    pub event_id: String,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub location: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: NotificationPriority,
}

impl ReservationNotification {
    pub fn validate(&self) -> NotificationResult<()> {
        require("reservation_id", &self.reservation_id)?;
        require("event_id", &self.event_id)?;
        require("event_name", &self.event_name)?;
        require("location", &self.location)?;
        require("recipient", &self.recipient)
    }
}

fn require(field: &str, value: &str) -> NotificationResult<()> {
    if value.trim().is_empty() {
        return Err(NotificationError::Validation(format!(
            "{} is required",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn sample(status: NotificationStatus) -> Notification {
        let request = CreateNotificationRequest::new(
            NotificationType::Welcome,
            "ana@example.com",
            "Welcome",
            "Hello Ana",
        );
        let mut notification = Notification::pending(Uuid::new_v4(), request, Utc::now());
        notification.status = status;
        notification
    }

    #[test]
    fn priority_defaults_to_normal() {
        let notification = sample(NotificationStatus::Pending);
        assert_eq!(notification.priority, NotificationPriority::Normal);
    }

    #[test]
    fn read_is_terminal() {
        for next in [
            NotificationStatus::Pending,
            NotificationStatus::Sending,
            NotificationStatus::Sent,
            NotificationStatus::Delivered,
            NotificationStatus::Failed,
        ] {
            assert!(!NotificationStatus::Read.can_transition_to(next));
        }
        assert!(NotificationStatus::Read.can_transition_to(NotificationStatus::Read));
    }

    #[test]
    fn reading_a_sent_notification_stamps_read_at_once() {
        let mut notification = sample(NotificationStatus::Pending);
        let sent_at = Utc::now();
        notification.mark_sent(sent_at);

        let first_read = sent_at + Duration::seconds(5);
        notification
            .apply_update(&NotificationUpdate::status(NotificationStatus::Read), first_read)
            .unwrap();

        let later = first_read + Duration::seconds(30);
        notification
            .apply_update(&NotificationUpdate::status(NotificationStatus::Read), later)
            .unwrap();

        assert_eq!(notification.sent_at, Some(sent_at));
        assert_eq!(notification.read_at, Some(first_read));
        assert_eq!(notification.updated_at, later);
    }

    #[test]
    fn read_at_requires_read_status() {
        let mut notification = sample(NotificationStatus::Sent);
        let update = NotificationUpdate {
            read_at: Some(Utc::now()),
            ..Default::default()
        };

        let err = notification.apply_update(&update, Utc::now()).unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));
        assert!(notification.read_at.is_none());
    }

    #[test]
    fn failed_after_send_cannot_return_to_pending() {
        let mut notification = sample(NotificationStatus::Pending);
        notification.mark_sent(Utc::now());
        notification
            .apply_update(&NotificationUpdate::status(NotificationStatus::Failed), Utc::now())
            .unwrap();

        let err = notification
            .apply_update(&NotificationUpdate::status(NotificationStatus::Pending), Utc::now())
            .unwrap_err();
        assert!(matches!(err, NotificationError::InvalidTransition { .. }));
    }

    #[test]
    fn failed_without_send_can_be_requeued() {
        let mut notification = sample(NotificationStatus::Pending);
        notification.mark_failed(Utc::now());

        notification
            .apply_update(&NotificationUpdate::status(NotificationStatus::Pending), Utc::now())
            .unwrap();
        assert_eq!(notification.status, NotificationStatus::Pending);
        assert!(notification.sent_at.is_none());
    }

    #[test]
    fn bulk_overrides_replace_item_values() {
        let batch = BulkNotificationRequest {
            notifications: vec![
                CreateNotificationRequest::new(NotificationType::Welcome, "a@x.io", "s", "c")
                    .with_priority(NotificationPriority::Low)
                    .with_template("own"),
                CreateNotificationRequest::new(NotificationType::Welcome, "b@x.io", "s", "c"),
            ],
            template_id: Some("batch_template".to_string()),
            priority: Some(NotificationPriority::Urgent),
        };

        for item in batch.into_items() {
            assert_eq!(item.priority, Some(NotificationPriority::Urgent));
            assert_eq!(item.template_id.as_deref(), Some("batch_template"));
        }
    }

    #[test]
    fn data_bag_keeps_closed_value_set() {
        let json = r#"{"name":"Ana","seats":2,"vip":true,"note":null,"venue":{"city":"Lima"}}"#;
        let bag: DataBag = serde_json::from_str(json).unwrap();

        assert_eq!(bag["name"], DataValue::String("Ana".to_string()));
        assert_eq!(bag["seats"], DataValue::from(2));
        assert_eq!(bag["vip"], DataValue::Bool(true));
        assert_eq!(bag["note"], DataValue::Null);
        assert!(matches!(bag["venue"], DataValue::Map(_)));

        assert!(serde_json::from_str::<DataBag>(r#"{"tags":["a"]}"#).is_err());
    }

    #[test]
    fn data_bag_numbers_round_trip_unchanged() {
        let json = r#"{"big":9007199254740993,"price":12.5,"seats":2}"#;
        let bag: DataBag = serde_json::from_str(json).unwrap();

        assert_eq!(serde_json::to_string(&bag).unwrap(), json);
        assert_eq!(DataValue::from(f64::NAN), DataValue::Null);
    }

    #[test]
    fn request_wire_names_are_preserved() {
        let json = r#"{"type":"event_reminder","recipient":"a@x.io","subject":"s","content":"c"}"#;
        let request: CreateNotificationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.notification_type, NotificationType::EventReminder);
        assert!(request.priority.is_none());
        assert!(request.template_id.is_none());
    }
}
