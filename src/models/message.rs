use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::NotificationError,
    models::notification::{EventNotification, ReservationNotification},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Events,
    Reservations,
    Reminders,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Events, QueueKind::Reservations, QueueKind::Reminders];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Events => "events",
            QueueKind::Reservations => "reservations",
            QueueKind::Reminders => "reminders",
        }
    }
}

impl Display for QueueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(QueueKind::Events),
            "reservations" => Ok(QueueKind::Reservations),
            "reminders" => Ok(QueueKind::Reminders),
            other => Err(NotificationError::InvalidQueueType(other.to_string())),
        }
    }
}

pub const EVENT_CREATED_TEMPLATE: &str = "event_created_template";
pub const EVENT_CANCELLED_TEMPLATE: &str = "event_cancelled_template";
pub const EVENT_REMINDER_TEMPLATE: &str = "event_reminder_template";
pub const RESERVATION_CREATED_TEMPLATE: &str = "reservation_created_template";
pub const RESERVATION_CONFIRMED_TEMPLATE: &str = "reservation_confirmed_template";
pub const RESERVATION_CANCELLED_TEMPLATE: &str = "reservation_cancelled_template";

pub const EVENT_REMINDER_TYPE: &str = "event_reminder";

fn wire_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotificationMessage {
    pub event_id: String,
    pub event_name: String,
    pub event_date: String,
    pub location: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub priority: String,
    pub template_id: String,
}

impl EventNotificationMessage {
    pub fn from_event(event: &EventNotification, template_id: &str) -> Self {
        Self {
            event_id: event.event_id.clone(),
            event_name: event.event_name.clone(),
            event_date: wire_date(&event.event_date),
            location: event.location.clone(),
            recipient: event.recipient.clone(),
            notification_type: event.notification_type.to_string(),
            priority: event.priority.to_string(),
            template_id: template_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationNotificationMessage {
    pub reservation_id: String,
    pub event_id: String,
    pub event_name: String,
    pub event_date: String,
    pub location: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub priority: String,
    pub template_id: String,
}

impl ReservationNotificationMessage {
    pub fn from_reservation(reservation: &ReservationNotification, template_id: &str) -> Self {
        Self {
            reservation_id: reservation.reservation_id.clone(),
            event_id: reservation.event_id.clone(),
            event_name: reservation.event_name.clone(),
            event_date: wire_date(&reservation.event_date),
            location: reservation.location.clone(),
            recipient: reservation.recipient.clone(),
            notification_type: reservation.notification_type.to_string(),
            priority: reservation.priority.to_string(),
            template_id: template_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderMessage {
    pub event_id: String,
    pub event_name: String,
    pub event_date: String,
    pub location: String,
    pub recipient: String,
    pub reminder_type: String,
    pub template_id: String,
}

impl ReminderMessage {
    pub fn from_event(event: &EventNotification) -> Self {
        Self {
            event_id: event.event_id.clone(),
            event_name: event.event_name.clone(),
            event_date: wire_date(&event.event_date),
            location: event.location.clone(),
            recipient: event.recipient.clone(),
            reminder_type: EVENT_REMINDER_TYPE.to_string(),
            template_id: EVENT_REMINDER_TEMPLATE.to_string(),
        }
    }
}

/// Envelope published to the dead-letter queue once a message exhausts its
/// receive budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub source_queue: QueueKind,
    pub message_id: String,
    pub original_body: String,
    pub failure_reason: String,
    pub receive_count: u32,
    pub failed_at: String,
}
