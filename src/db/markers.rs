//! Feed seen-sets, processed markers and delivery intents.
//!
//! All three are insert-only idempotency sets; rows are never cleared.

use crate::error::DatabaseError;
use crate::types::{IntentRecord, SinkKind};
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Check whether a feed entry id was already handled
    pub async fn is_seen(&self, feed_url: &str, item_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM seen_items WHERE feed_url = ? AND item_id = ?")
                .bind(feed_url)
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check seen item: {}",
                        e
                    )))
                })?;

        Ok(found.is_some())
    }

    /// Record a feed entry id as handled
    pub async fn add_seen(&self, feed_url: &str, item_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO seen_items (feed_url, item_id, seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT(feed_url, item_id) DO NOTHING
            "#,
        )
        .bind(feed_url)
        .bind(item_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record seen item: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Add a processed marker
    ///
    /// Returns `true` if the marker was newly inserted, `false` if it already existed.
    pub async fn add_processed(&self, marker: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO processed_markers (marker, processed_at)
            VALUES (?, ?)
            ON CONFLICT(marker) DO NOTHING
            "#,
        )
        .bind(marker)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to add processed marker: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Check whether a processed marker exists
    pub async fn is_processed(&self, marker: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM processed_markers WHERE marker = ?")
                .bind(marker)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check processed marker: {}",
                        e
                    )))
                })?;

        Ok(found.is_some())
    }

    /// Store (or replace) the delivery intent for a backend-prefixed id
    pub async fn set_intent(&self, marker: &str, intent: &IntentRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO intents (marker, sink_kind, owner_ref, delete_after_upload, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(marker) DO UPDATE SET
                sink_kind = excluded.sink_kind,
                owner_ref = excluded.owner_ref,
                delete_after_upload = excluded.delete_after_upload
            "#,
        )
        .bind(marker)
        .bind(intent.sink_kind.as_str())
        .bind(intent.owner_ref.as_deref())
        .bind(intent.delete_after_upload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set intent: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get the delivery intent for a backend-prefixed id
    pub async fn get_intent(&self, marker: &str) -> Result<Option<IntentRecord>> {
        let row: Option<(String, Option<String>, bool)> = sqlx::query_as(
            "SELECT sink_kind, owner_ref, delete_after_upload FROM intents WHERE marker = ?",
        )
        .bind(marker)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get intent: {}",
                e
            )))
        })?;

        row.map(|(sink_kind, owner_ref, delete_after_upload)| {
            Ok(IntentRecord {
                sink_kind: sink_kind.parse::<SinkKind>()?,
                owner_ref,
                delete_after_upload,
            })
        })
        .transpose()
    }
}
