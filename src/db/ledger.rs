//! Content-hash upload ledger.

use crate::error::DatabaseError;
use crate::types::{SinkKind, UploadLedgerEntry};
use crate::{Error, Result};
use chrono::TimeZone;

use super::{Database, LedgerRow};

impl Database {
    /// Whether content with this hash was already delivered to `sink`
    pub async fn is_uploaded(&self, content_hash: &str, sink: SinkKind) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM upload_ledger WHERE content_hash = ? AND sink_kind = ?",
        )
        .bind(content_hash)
        .bind(sink.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check upload ledger: {}",
                e
            )))
        })?;

        Ok(found.is_some())
    }

    /// Record a completed delivery of `content_hash` to `sink`
    ///
    /// The first delivery wins; later calls for the same pair keep the original row.
    pub async fn mark_uploaded(
        &self,
        content_hash: &str,
        sink: SinkKind,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO upload_ledger (content_hash, sink_kind, metadata, delivered_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(content_hash, sink_kind) DO NOTHING
            "#,
        )
        .bind(content_hash)
        .bind(sink.as_str())
        .bind(metadata.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update upload ledger: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// All ledger entries for a content hash, one per sink it reached
    pub async fn get_ledger_entries(&self, content_hash: &str) -> Result<Vec<UploadLedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT content_hash, sink_kind, metadata, delivered_at
            FROM upload_ledger
            WHERE content_hash = ?
            ORDER BY delivered_at ASC
            "#,
        )
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read upload ledger: {}",
                e
            )))
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(UploadLedgerEntry {
                    content_hash: row.content_hash,
                    sink_kind: row.sink_kind.parse()?,
                    metadata: serde_json::from_str(&row.metadata)?,
                    delivered_at: chrono::Utc
                        .timestamp_opt(row.delivered_at, 0)
                        .single()
                        .unwrap_or_else(chrono::Utc::now),
                })
            })
            .collect()
    }
}
