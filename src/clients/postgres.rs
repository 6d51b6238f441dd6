use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_postgres::{Client, NoTls, error::SqlState, types::ToSql};
use tracing::{debug, error, info};

use crate::{
    clients::store::{Collection, Item, RecordStore, ScanFilter, item_id, next_updated_at},
    error::StoreError,
};

/// Record store backed by PostgreSQL: one table per collection, each row an
/// `id` plus the whole item as JSONB.
pub struct PostgresRecordStore {
    client: Client,
}

impl PostgresRecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL record store");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    /// Creates the collection tables. Writes against a missing table fail with
    /// [`StoreError::CollectionNotFound`] instead.
    pub async fn ensure_collections(&self) -> Result<(), StoreError> {
        for collection in [Collection::Notifications, Collection::Templates] {
            let statement = format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, item JSONB NOT NULL)",
                collection.name()
            );
            self.client
                .batch_execute(&statement)
                .await
                .map_err(|e| classify(collection, e))?;
        }

        info!("Record store collections ensured");
        Ok(())
    }

    fn into_item(collection: Collection, value: Value) -> Result<Item, StoreError> {
        match value {
            Value::Object(item) => Ok(item),
            other => Err(StoreError::Serialization(format!(
                "{} row holds {} instead of an object",
                collection, other
            ))),
        }
    }
}

fn classify(collection: Collection, err: tokio_postgres::Error) -> StoreError {
    if let Some(code) = err.code() {
        if *code == SqlState::UNDEFINED_TABLE {
            return StoreError::CollectionNotFound(collection.name().to_string());
        }
        if *code == SqlState::UNIQUE_VIOLATION {
            return StoreError::Conflict(format!("{} already holds this id", collection));
        }
    }

    if err.is_closed() || err.code().is_none() {
        return StoreError::Connectivity(err.to_string());
    }

    StoreError::Backend(err.to_string())
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn put(&self, collection: Collection, item: Item) -> Result<(), StoreError> {
        let id = item_id(&item)?.to_string();
        let statement = format!(
            "INSERT INTO {} (id, item) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET item = EXCLUDED.item",
            collection.name()
        );

        self.client
            .execute(&statement, &[&id, &Value::Object(item)])
            .await
            .map_err(|e| classify(collection, e))?;

        debug!(collection = %collection, id = %id, "Item stored");
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Item>, StoreError> {
        let statement = format!("SELECT item FROM {} WHERE id = $1", collection.name());

        let row = self
            .client
            .query_opt(&statement, &[&id])
            .await
            .map_err(|e| classify(collection, e))?;

        row.map(|row| Self::into_item(collection, row.get::<_, Value>(0)))
            .transpose()
    }

    async fn scan(
        &self,
        collection: Collection,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        let mut statement = format!("SELECT item FROM {}", collection.name());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(filter.len() * 2 + 1);

        for (n, (field, value)) in filter.iter().enumerate() {
            statement.push_str(if n == 0 { " WHERE " } else { " AND " });
            statement.push_str(&format!("item->>${} = ${}", n * 2 + 1, n * 2 + 2));
            params.push(field);
            params.push(value);
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        statement.push_str(&format!(" ORDER BY id LIMIT ${}", params.len() + 1));
        params.push(&limit);

        let rows = self
            .client
            .query(&statement, &params)
            .await
            .map_err(|e| classify(collection, e))?;

        rows.into_iter()
            .map(|row| Self::into_item(collection, row.get::<_, Value>(0)))
            .collect()
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        mut fields: Item,
    ) -> Result<bool, StoreError> {
        let current = match self.get(collection, id).await? {
            Some(current) => current,
            None => return Ok(false),
        };

        fields.remove("id");
        fields.insert(
            "updated_at".to_string(),
            next_updated_at(current.get("updated_at"), Utc::now()),
        );

        let statement = format!(
            "UPDATE {} SET item = item || $2::jsonb WHERE id = $1",
            collection.name()
        );

        let updated = self
            .client
            .execute(&statement, &[&id, &Value::Object(fields)])
            .await
            .map_err(|e| classify(collection, e))?;

        debug!(collection = %collection, id, "Item updated");
        Ok(updated > 0)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let statement = format!("DELETE FROM {} WHERE id = $1", collection.name());

        self.client
            .execute(&statement, &[&id])
            .await
            .map_err(|e| classify(collection, e))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;

        Ok(())
    }
}
