//! Latest stage per transfer item.

use crate::error::DatabaseError;
use crate::types::{ItemStatusRecord, Stage, TransferId};
use crate::{Error, Result};
use chrono::TimeZone;

use super::{Database, ItemStatusRow};

impl ItemStatusRow {
    fn into_record(self) -> Result<ItemStatusRecord> {
        Ok(ItemStatusRecord {
            item_id: TransferId(self.item_id),
            name: self.name,
            stage: Stage::from_i32(self.stage),
            sink_kind: self.sink_kind.parse()?,
            error: self.error,
            updated_at: chrono::Utc
                .timestamp_opt(self.updated_at, 0)
                .single()
                .unwrap_or_else(chrono::Utc::now),
        })
    }
}

impl Database {
    /// Insert or overwrite the status of an item
    pub async fn set_item_status(&self, record: &ItemStatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO item_status (item_id, name, stage, sink_kind, error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                name = excluded.name,
                stage = excluded.stage,
                sink_kind = excluded.sink_kind,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.item_id)
        .bind(&record.name)
        .bind(record.stage.to_i32())
        .bind(record.sink_kind.as_str())
        .bind(record.error.as_deref())
        .bind(record.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set item status: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get the status of an item
    pub async fn get_item_status(&self, id: TransferId) -> Result<Option<ItemStatusRecord>> {
        let row = sqlx::query_as::<_, ItemStatusRow>(
            r#"
            SELECT item_id, name, stage, sink_kind, error, updated_at
            FROM item_status
            WHERE item_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get item status: {}",
                e
            )))
        })?;

        row.map(ItemStatusRow::into_record).transpose()
    }

    /// List items currently at `stage`, oldest update first
    pub async fn list_item_status(&self, stage: Stage) -> Result<Vec<ItemStatusRecord>> {
        let rows = sqlx::query_as::<_, ItemStatusRow>(
            r#"
            SELECT item_id, name, stage, sink_kind, error, updated_at
            FROM item_status
            WHERE stage = ?
            ORDER BY updated_at ASC, item_id ASC
            "#,
        )
        .bind(stage.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list item status: {}",
                e
            )))
        })?;

        rows.into_iter().map(ItemStatusRow::into_record).collect()
    }
}
