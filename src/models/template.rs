use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::notification::NotificationType;

/// Named content template. `template_id` on a notification is an opaque
/// reference to one of these; interpolation happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationTemplate {
    pub fn new(
        name: impl Into<String>,
        notification_type: NotificationType,
        subject: impl Into<String>,
        content: impl Into<String>,
        variables: Vec<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            notification_type,
            subject: subject.into(),
            content: content.into(),
            variables,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.updated_at);
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.touch(now);
    }
}
