//! Subject and body text for event, reservation and reminder emails.

use chrono::{DateTime, Utc};

use crate::models::{
    message::{
        EVENT_CANCELLED_TEMPLATE, EVENT_CREATED_TEMPLATE, EVENT_REMINDER_TEMPLATE,
        RESERVATION_CANCELLED_TEMPLATE, RESERVATION_CONFIRMED_TEMPLATE,
        RESERVATION_CREATED_TEMPLATE,
    },
    notification::NotificationType,
};

/// Day-first format used in human-readable bodies.
pub fn display_date(date: &DateTime<Utc>) -> String {
    date.format("%d/%m/%Y %H:%M").to_string()
}

/// Renders a wire timestamp for display, leaving unparseable input untouched.
pub fn display_wire_date(date: &str) -> String {
    DateTime::parse_from_rfc3339(date)
        .map(|d| display_date(&d.with_timezone(&Utc)))
        .unwrap_or_else(|_| date.to_string())
}

/// The wording a known event template renders as, whatever `type` the
/// caller supplied. `None` for templates this service does not own.
pub fn event_template_type(template_id: &str) -> Option<NotificationType> {
    match template_id {
        EVENT_CREATED_TEMPLATE => Some(NotificationType::EventCreated),
        EVENT_CANCELLED_TEMPLATE => Some(NotificationType::EventCancelled),
        EVENT_REMINDER_TEMPLATE => Some(NotificationType::EventReminder),
        _ => None,
    }
}

pub fn reservation_template_type(template_id: &str) -> Option<NotificationType> {
    match template_id {
        RESERVATION_CREATED_TEMPLATE | RESERVATION_CONFIRMED_TEMPLATE => {
            Some(NotificationType::ReservationCreated)
        }
        RESERVATION_CANCELLED_TEMPLATE => Some(NotificationType::ReservationCancelled),
        _ => None,
    }
}

pub fn event_subject(notification_type: NotificationType, event_name: &str) -> String {
    match notification_type {
        NotificationType::EventCreated => format!("New Event: {}", event_name),
        NotificationType::EventCancelled => format!("Event Cancelled: {}", event_name),
        NotificationType::EventUpdated => format!("Event Updated: {}", event_name),
        NotificationType::EventReminder => format!("Reminder: {}", event_name),
        _ => format!("Event Notice: {}", event_name),
    }
}

pub fn event_body(
    notification_type: NotificationType,
    event_name: &str,
    location: &str,
    date: &str,
) -> String {
    match notification_type {
        NotificationType::EventCreated => format!(
            "A new event has been created: {} at {} on {}",
            event_name, location, date
        ),
        NotificationType::EventCancelled => format!(
            "The event '{}' scheduled for {} at {} has been cancelled.",
            event_name, date, location
        ),
        NotificationType::EventUpdated => format!(
            "The event '{}' has been updated. It now takes place on {} at {}.",
            event_name, date, location
        ),
        _ => reminder_body(event_name, location, date),
    }
}

pub fn reservation_subject(notification_type: NotificationType, event_name: &str) -> String {
    match notification_type {
        NotificationType::ReservationCancelled => format!("Reservation Cancelled: {}", event_name),
        NotificationType::TicketGenerated => format!("Your Tickets: {}", event_name),
        _ => format!("Reservation Confirmed: {}", event_name),
    }
}

pub fn reservation_body(
    notification_type: NotificationType,
    event_name: &str,
    location: &str,
    date: &str,
    reservation_id: &str,
) -> String {
    let outcome = match notification_type {
        NotificationType::ReservationCancelled => "has been cancelled",
        NotificationType::TicketGenerated => "has its tickets ready",
        _ => "has been confirmed",
    };

    format!(
        "Your reservation for the event '{}' on {} at {} {}. Reservation ID: {}",
        event_name, date, location, outcome, reservation_id
    )
}

pub fn reminder_body(event_name: &str, location: &str, date: &str) -> String {
    format!(
        "Reminder: '{}' takes place on {} at {}.",
        event_name, date, location
    )
}
