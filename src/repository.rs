use std::sync::Arc;

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    clients::store::{Collection, Item, RecordStore, ScanFilter},
    error::{NotificationError, NotificationResult, StoreError},
    models::{
        notification::{Notification, NotificationType, NotificationUpdate},
        template::NotificationTemplate,
    },
};

/// Fields of a stored notification that `update_notification` may touch.
const MUTABLE_NOTIFICATION_FIELDS: [&str; 3] = ["status", "sent_at", "read_at"];

/// Typed access to notifications and templates on top of a [`RecordStore`].
#[derive(Clone)]
pub struct NotificationRepository {
    store: Arc<dyn RecordStore>,
}

impl NotificationRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn save_notification(&self, notification: &Notification) -> NotificationResult<()> {
        self.store
            .put(Collection::Notifications, to_item(notification)?)
            .await?;

        debug!(
            notification_id = %notification.id,
            status = %notification.status,
            "Notification saved"
        );
        Ok(())
    }

    pub async fn get_notification(&self, id: Uuid) -> NotificationResult<Notification> {
        let item = self
            .store
            .get(Collection::Notifications, &id.to_string())
            .await?
            .ok_or_else(|| not_found(Collection::Notifications, id))?;

        from_item(item)
    }

    pub async fn list_notifications(
        &self,
        recipient: Option<&str>,
        notification_type: Option<NotificationType>,
        limit: usize,
    ) -> NotificationResult<Vec<Notification>> {
        let mut filter = ScanFilter::new();
        if let Some(recipient) = recipient.filter(|r| !r.is_empty()) {
            filter.insert("recipient".to_string(), recipient.to_string());
        }
        if let Some(notification_type) = notification_type {
            filter.insert("type".to_string(), notification_type.to_string());
        }

        self.store
            .scan(Collection::Notifications, &filter, limit)
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }

    /// Applies `update` through the lifecycle rules, then writes back only the
    /// status and timestamp fields.
    pub async fn update_notification(
        &self,
        id: Uuid,
        update: &NotificationUpdate,
    ) -> NotificationResult<Notification> {
        if update.is_empty() {
            return Err(NotificationError::Validation(
                "update must set status, sent_at or read_at".to_string(),
            ));
        }

        let mut notification = self.get_notification(id).await?;
        notification.apply_update(update, Utc::now())?;

        let full = to_item(&notification)?;
        let fields: Item = MUTABLE_NOTIFICATION_FIELDS
            .iter()
            .filter_map(|field| full.get(*field).map(|v| (field.to_string(), v.clone())))
            .filter(|(_, value)| !value.is_null())
            .collect();

        let found = self
            .store
            .update(Collection::Notifications, &id.to_string(), fields)
            .await?;
        if !found {
            return Err(not_found(Collection::Notifications, id));
        }

        info!(notification_id = %id, status = %notification.status, "Notification updated");

        self.get_notification(id).await
    }

    pub async fn delete_notification(&self, id: Uuid) -> NotificationResult<()> {
        self.store
            .delete(Collection::Notifications, &id.to_string())
            .await?;

        info!(notification_id = %id, "Notification deleted");
        Ok(())
    }

    pub async fn save_template(&self, template: &mut NotificationTemplate) -> NotificationResult<()> {
        template.touch(Utc::now());
        self.store
            .put(Collection::Templates, to_item(template)?)
            .await?;

        debug!(template_id = %template.id, name = %template.name, "Template saved");
        Ok(())
    }

    pub async fn get_template(&self, id: Uuid) -> NotificationResult<NotificationTemplate> {
        let item = self
            .store
            .get(Collection::Templates, &id.to_string())
            .await?
            .ok_or_else(|| not_found(Collection::Templates, id))?;

        from_item(item)
    }

    pub async fn list_active_templates(
        &self,
        notification_type: Option<NotificationType>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationTemplate>> {
        let mut filter = ScanFilter::new();
        filter.insert("is_active".to_string(), "true".to_string());
        if let Some(notification_type) = notification_type {
            filter.insert("type".to_string(), notification_type.to_string());
        }

        self.store
            .scan(Collection::Templates, &filter, limit)
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }
}

fn not_found(collection: Collection, id: Uuid) -> NotificationError {
    NotificationError::NotFound {
        collection: collection.name().to_string(),
        id: id.to_string(),
    }
}

fn to_item<T: Serialize>(value: &T) -> Result<Item, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(item) => Ok(item),
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

fn from_item<T: DeserializeOwned>(item: Item) -> NotificationResult<T> {
    serde_json::from_value(Value::Object(item))
        .map_err(|e| NotificationError::Store(StoreError::from(e)))
}
