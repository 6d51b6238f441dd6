use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ticket_notifications::{
    clients::{
        memory::{InMemoryQueue, InMemoryRecordStore, MockEmailTransport},
        queue::QueueSet,
    },
    models::notification::{
        EventNotification, NotificationPriority, NotificationType, ReservationNotification,
    },
    repository::NotificationRepository,
    services::{handlers::NotificationDesk, orchestrator::NotificationOrchestrator},
};

pub const SENDER: &str = "notifications@ticket-system.com";

/// In-memory wiring of every collaborator, with handles kept for inspection.
pub struct Harness {
    pub events: Arc<InMemoryQueue>,
    pub reservations: Arc<InMemoryQueue>,
    pub reminders: Arc<InMemoryQueue>,
    pub email: Arc<MockEmailTransport>,
    pub store: Arc<InMemoryRecordStore>,
    pub orchestrator: NotificationOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_email(MockEmailTransport::new())
    }

    pub fn with_email(email: MockEmailTransport) -> Self {
        Self::build(email, InMemoryRecordStore::new())
    }

    pub fn build(email: MockEmailTransport, store: InMemoryRecordStore) -> Self {
        let events = Arc::new(InMemoryQueue::new("events"));
        let reservations = Arc::new(InMemoryQueue::new("reservations"));
        let reminders = Arc::new(InMemoryQueue::new("reminders"));
        let email = Arc::new(email);

        let orchestrator = NotificationOrchestrator::new(
            email.clone(),
            queue_set(&events, &reservations, &reminders),
            SENDER,
        );

        Self {
            events,
            reservations,
            reminders,
            email,
            store: Arc::new(store),
            orchestrator,
        }
    }

    pub fn queues(&self) -> QueueSet {
        queue_set(&self.events, &self.reservations, &self.reminders)
    }

    pub fn repository(&self) -> NotificationRepository {
        NotificationRepository::new(self.store.clone())
    }

    pub fn desk(&self) -> NotificationDesk {
        NotificationDesk::new(self.orchestrator.clone(), self.repository())
    }

    pub async fn queue_operations(&self) -> usize {
        self.events.operation_count().await
            + self.reservations.operation_count().await
            + self.reminders.operation_count().await
    }
}

fn queue_set(
    events: &Arc<InMemoryQueue>,
    reservations: &Arc<InMemoryQueue>,
    reminders: &Arc<InMemoryQueue>,
) -> QueueSet {
    QueueSet::new(events.clone(), reservations.clone(), reminders.clone())
}

pub fn event(notification_type: NotificationType, priority: NotificationPriority) -> EventNotification {
    EventNotification {
        event_id: "evt-100".to_string(),
        event_name: "Jazz Night".to_string(),
        event_date: Utc.with_ymd_and_hms(2026, 11, 3, 20, 30, 0).unwrap(),
        location: "Blue Hall".to_string(),
        recipient: "ana@example.com".to_string(),
        notification_type,
        priority,
    }
}

pub fn reservation(notification_type: NotificationType, priority: NotificationPriority) -> ReservationNotification {
    ReservationNotification {
        reservation_id: "res-7".to_string(),
        event_id: "evt-100".to_string(),
        event_name: "Jazz Night".to_string(),
        event_date: Utc.with_ymd_and_hms(2026, 11, 3, 20, 30, 0).unwrap(),
        location: "Blue Hall".to_string(),
        recipient: "ana@example.com".to_string(),
        notification_type,
        priority,
    }
}
