use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreError;

/// Schema-less record: field name to JSON value, always carrying an `id`.
pub type Item = serde_json::Map<String, Value>;

/// Exact-match conjunction over named fields.
pub type ScanFilter = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Notifications,
    Templates,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Notifications => "notifications",
            Collection::Templates => "notification_templates",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Key-value record store over the `notifications` and
/// `notification_templates` collections.
///
/// `update` merges any field name verbatim.
/// The store refreshes `updated_at` on every update. Narrowing to a closed set
/// of mutable fields happens one layer up, in the repository.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Idempotent upsert keyed by the item's `id`.
    async fn put(&self, collection: Collection, item: Item) -> Result<(), StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Item>, StoreError>;

    async fn scan(
        &self,
        collection: Collection,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError>;

    /// Merges `fields` into the stored item. Returns `false` when no item has
    /// this id; nothing is written in that case.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Item,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub fn item_id(item: &Item) -> Result<&str, StoreError> {
    item.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Serialization("item has no string 'id' field".to_string()))
}

/// Field values compare by their string form, so `"true"` matches `true`.
pub fn matches_filter(item: &Item, filter: &ScanFilter) -> bool {
    filter.iter().all(|(field, expected)| match item.get(field) {
        Some(Value::String(actual)) => actual == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == *expected,
    })
}

/// `updated_at` for a write that follows `previous`; never moves backwards.
pub fn next_updated_at(previous: Option<&Value>, now: DateTime<Utc>) -> Value {
    let previous = previous
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let next = match previous {
        Some(previous) if previous > now => previous,
        _ => now,
    };

    Value::String(next.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn filter_is_a_conjunction_of_exact_matches() {
        let record = item(json!({"id": "1", "recipient": "ana@example.com", "type": "welcome"}));

        let mut filter = ScanFilter::new();
        filter.insert("recipient".into(), "ana@example.com".into());
        assert!(matches_filter(&record, &filter));

        filter.insert("type".into(), "welcome".into());
        assert!(matches_filter(&record, &filter));

        filter.insert("type".into(), "welc".into());
        assert!(!matches_filter(&record, &filter));
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let now = Utc::now();
        let future = now + Duration::seconds(60);
        let previous = Value::String(future.to_rfc3339());

        assert_eq!(next_updated_at(Some(&previous), now), previous);
        assert_eq!(next_updated_at(None, now), Value::String(now.to_rfc3339()));
    }

    #[test]
    fn item_without_id_is_rejected() {
        assert!(item_id(&item(json!({"name": "x"}))).is_err());
        assert_eq!(item_id(&item(json!({"id": "abc"}))).unwrap(), "abc");
    }
}
