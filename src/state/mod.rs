//! Pluggable persistent state.
//!
//! [`StateStore`] is the key space every component shares: feed seen-sets, processed
//! markers, delivery intents, job records, the upload ledger, feed configurations and
//! per-item status. It is object-safe and shared as `Arc<dyn StateStore>`.
//!
//! Two implementations exist:
//! - [`Database`](crate::db::Database): SQLite, single-process, durable
//! - [`RedisStore`]: Redis, safe with several pollers running at once
//!
//! [`open_state_store`] picks between them from [`PersistenceConfig`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PersistenceConfig;
use crate::db::Database;
use crate::types::{FeedConfig, IntentRecord, ItemStatusRecord, JobRecord, SinkKind, Stage, TransferId};
use crate::Result;

mod redis_store;
mod sqlite;

pub use redis_store::RedisStore;

/// Persistent key space shared by the pipeline, the monitor, the feed manager and the job runner
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether a feed entry id was already handled
    async fn is_seen(&self, feed_url: &str, item_id: &str) -> Result<bool>;

    /// Record a feed entry id as handled
    async fn add_seen(&self, feed_url: &str, item_id: &str) -> Result<()>;

    /// Insert or replace a job record (expires after a day)
    async fn set_job(&self, job_id: &str, record: &JobRecord) -> Result<()>;

    /// Get a job record
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// List all live job records
    async fn list_jobs(&self) -> Result<Vec<(String, JobRecord)>>;

    /// Add a processed marker, returning `true` if it was not already present
    async fn add_processed(&self, marker: &str) -> Result<bool>;

    /// Whether a processed marker exists
    async fn is_processed(&self, marker: &str) -> Result<bool>;

    /// Store the delivery intent for a backend-prefixed id
    async fn set_intent(&self, marker: &str, intent: &IntentRecord) -> Result<()>;

    /// Get the delivery intent for a backend-prefixed id
    async fn get_intent(&self, marker: &str) -> Result<Option<IntentRecord>>;

    /// Whether content with this hash was already delivered to `sink`
    async fn is_uploaded(&self, content_hash: &str, sink: SinkKind) -> Result<bool>;

    /// Record a delivery of `content_hash` to `sink`
    async fn mark_uploaded(
        &self,
        content_hash: &str,
        sink: SinkKind,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    /// All persisted feeds
    async fn get_feeds(&self) -> Result<Vec<FeedConfig>>;

    /// Replace the persisted feed list
    async fn save_feeds(&self, feeds: &[FeedConfig]) -> Result<()>;

    /// Record the latest stage of an item
    async fn set_item_status(&self, record: &ItemStatusRecord) -> Result<()>;

    /// Latest recorded stage of an item
    async fn get_item_status(&self, id: TransferId) -> Result<Option<ItemStatusRecord>>;

    /// Items whose latest stage is `stage`
    async fn list_item_status(&self, stage: Stage) -> Result<Vec<ItemStatusRecord>>;
}

/// Open the configured state store
///
/// Uses Redis when `redis_url` is set and the server answers, otherwise the SQLite
/// database at `database_path`. An unreachable Redis is logged and the SQLite store is
/// used instead, so a single-host deployment keeps working when Redis is down.
pub async fn open_state_store(config: &PersistenceConfig) -> Result<Arc<dyn StateStore>> {
    if let Some(url) = config.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
        match RedisStore::connect(url).await {
            Ok(store) => {
                tracing::info!("Using Redis state store");
                return Ok(Arc::new(store));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    database = %config.database_path.display(),
                    "Redis unavailable, falling back to SQLite state store"
                );
            }
        }
    }

    let db = Database::new(&config.database_path).await?;
    tracing::info!(
        database = %config.database_path.display(),
        "Using SQLite state store"
    );
    Ok(Arc::new(db))
}
