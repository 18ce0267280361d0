//! Redis-backed [`StateStore`].
//!
//! Key layout:
//! - `rss:seen:{feed_url}`: set of entry ids
//! - `processed_torrents`: set of processed markers
//! - `intent:{marker}`: JSON [`IntentRecord`]
//! - `job:{id}`: JSON [`JobRecord`] with a one-day expiry, ids indexed in `jobs`
//! - `upload:{hash}`: hash of sink name to JSON metadata
//! - `feeds`: JSON array of [`FeedConfig`]
//! - `item:{id}`: JSON [`ItemStatusRecord`], ids indexed in `items:stage:{stage}`

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::StateStore;
use crate::db::JOB_TTL_SECS;
use crate::types::{FeedConfig, IntentRecord, ItemStatusRecord, JobRecord, SinkKind, Stage, TransferId};
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Distributed state store on Redis
///
/// Set membership writes use `SADD`, so concurrent pollers agree on which markers
/// were newly added.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_prefix(url, "").await
    }

    /// Connect with every key namespaced under `prefix`
    pub async fn connect_with_prefix(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Other(format!("timed out connecting to Redis at {}", url)))??;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn stage_key(&self, stage: Stage) -> String {
        self.key(&format!("items:stage:{}", stage.as_str()))
    }

    async fn item_record(&self, id: i64) -> Result<Option<ItemStatusRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.key(&format!("item:{}", id))).await?;
        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn is_seen(&self, feed_url: &str, item_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn
            .sismember(self.key(&format!("rss:seen:{}", feed_url)), item_id)
            .await?)
    }

    async fn add_seen(&self, feed_url: &str, item_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .sadd(self.key(&format!("rss:seen:{}", feed_url)), item_id)
            .await?;
        Ok(())
    }

    async fn set_job(&self, job_id: &str, record: &JobRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        let (): () = redis::pipe()
            .atomic()
            .set_ex(self.key(&format!("job:{}", job_id)), json, JOB_TTL_SECS as u64)
            .ignore()
            .sadd(self.key("jobs"), job_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.key(&format!("job:{}", job_id))).await?;
        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<(String, JobRecord)>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(self.key("jobs")).await?;
        ids.sort();

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_job(&id).await? {
                Some(record) => jobs.push((id, record)),
                None => {
                    // expired; drop it from the index
                    let _: i64 = conn.srem(self.key("jobs"), &id).await?;
                }
            }
        }
        Ok(jobs)
    }

    async fn add_processed(&self, marker: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(self.key("processed_torrents"), marker).await?;
        Ok(added > 0)
    }

    async fn is_processed(&self, marker: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(self.key("processed_torrents"), marker).await?)
    }

    async fn set_intent(&self, marker: &str, intent: &IntentRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(intent)?;
        let (): () = conn.set(self.key(&format!("intent:{}", marker)), json).await?;
        Ok(())
    }

    async fn get_intent(&self, marker: &str) -> Result<Option<IntentRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.key(&format!("intent:{}", marker))).await?;
        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    async fn is_uploaded(&self, content_hash: &str, sink: SinkKind) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn
            .hexists(self.key(&format!("upload:{}", content_hash)), sink.as_str())
            .await?)
    }

    async fn mark_uploaded(
        &self,
        content_hash: &str,
        sink: SinkKind,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let entry = serde_json::json!({
            "metadata": metadata,
            "delivered_at": chrono::Utc::now(),
        });
        let _: bool = conn
            .hset_nx(
                self.key(&format!("upload:{}", content_hash)),
                sink.as_str(),
                entry.to_string(),
            )
            .await?;
        Ok(())
    }

    async fn get_feeds(&self) -> Result<Vec<FeedConfig>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.key("feeds")).await?;
        match json {
            Some(j) => Ok(serde_json::from_str(&j)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_feeds(&self, feeds: &[FeedConfig]) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(feeds)?;
        let (): () = conn.set(self.key("feeds"), json).await?;
        Ok(())
    }

    async fn set_item_status(&self, record: &ItemStatusRecord) -> Result<()> {
        let id = record.item_id.get();
        let previous = self.item_record(id).await?;
        let json = serde_json::to_string(record)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(prev) = previous.filter(|p| p.stage != record.stage) {
            pipe.srem(self.stage_key(prev.stage), id).ignore();
        }
        pipe.set(self.key(&format!("item:{}", id)), json)
            .ignore()
            .sadd(self.stage_key(record.stage), id)
            .ignore();

        let mut conn = self.conn.clone();
        let (): () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_item_status(&self, id: TransferId) -> Result<Option<ItemStatusRecord>> {
        self.item_record(id.get()).await
    }

    async fn list_item_status(&self, stage: Stage) -> Result<Vec<ItemStatusRecord>> {
        let mut conn = self.conn.clone();
        let ids: Vec<i64> = conn.smembers(self.stage_key(stage)).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.item_record(id).await?
                && record.stage == stage
            {
                records.push(record);
            }
        }
        records.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then(a.item_id.cmp(&b.item_id))
        });
        Ok(records)
    }
}
