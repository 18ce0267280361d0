//! Persisted feed configurations.

use crate::error::DatabaseError;
use crate::types::FeedConfig;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Get all feeds in the order they were saved
    pub async fn get_feeds(&self) -> Result<Vec<FeedConfig>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT config FROM feeds ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get feeds: {}",
                        e
                    )))
                })?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    /// Replace the stored feed list
    ///
    /// Runs in a single transaction so readers never observe a partial list.
    pub async fn save_feeds(&self, feeds: &[FeedConfig]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM feeds")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear feeds: {}",
                    e
                )))
            })?;

        for (position, feed) in feeds.iter().enumerate() {
            let json = serde_json::to_string(feed)?;
            sqlx::query("INSERT INTO feeds (url, position, config) VALUES (?, ?, ?)")
                .bind(&feed.url)
                .bind(position as i64)
                .bind(json)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to save feed {}: {}",
                        feed.url, e
                    )))
                })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit feeds: {}",
                e
            )))
        })?;

        Ok(())
    }
}
