use async_trait::async_trait;

use super::StateStore;
use crate::db::Database;
use crate::types::{FeedConfig, IntentRecord, ItemStatusRecord, JobRecord, SinkKind, Stage, TransferId};
use crate::Result;

#[async_trait]
impl StateStore for Database {
    async fn is_seen(&self, feed_url: &str, item_id: &str) -> Result<bool> {
        Database::is_seen(self, feed_url, item_id).await
    }

    async fn add_seen(&self, feed_url: &str, item_id: &str) -> Result<()> {
        Database::add_seen(self, feed_url, item_id).await
    }

    async fn set_job(&self, job_id: &str, record: &JobRecord) -> Result<()> {
        Database::set_job(self, job_id, record).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Database::get_job(self, job_id).await
    }

    async fn list_jobs(&self) -> Result<Vec<(String, JobRecord)>> {
        Database::list_jobs(self).await
    }

    async fn add_processed(&self, marker: &str) -> Result<bool> {
        Database::add_processed(self, marker).await
    }

    async fn is_processed(&self, marker: &str) -> Result<bool> {
        Database::is_processed(self, marker).await
    }

    async fn set_intent(&self, marker: &str, intent: &IntentRecord) -> Result<()> {
        Database::set_intent(self, marker, intent).await
    }

    async fn get_intent(&self, marker: &str) -> Result<Option<IntentRecord>> {
        Database::get_intent(self, marker).await
    }

    async fn is_uploaded(&self, content_hash: &str, sink: SinkKind) -> Result<bool> {
        Database::is_uploaded(self, content_hash, sink).await
    }

    async fn mark_uploaded(
        &self,
        content_hash: &str,
        sink: SinkKind,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        Database::mark_uploaded(self, content_hash, sink, metadata).await
    }

    async fn get_feeds(&self) -> Result<Vec<FeedConfig>> {
        Database::get_feeds(self).await
    }

    async fn save_feeds(&self, feeds: &[FeedConfig]) -> Result<()> {
        Database::save_feeds(self, feeds).await
    }

    async fn set_item_status(&self, record: &ItemStatusRecord) -> Result<()> {
        Database::set_item_status(self, record).await
    }

    async fn get_item_status(&self, id: TransferId) -> Result<Option<ItemStatusRecord>> {
        Database::get_item_status(self, id).await
    }

    async fn list_item_status(&self, stage: Stage) -> Result<Vec<ItemStatusRecord>> {
        Database::list_item_status(self, stage).await
    }
}
