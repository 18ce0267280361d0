//! External tool job records.
//!
//! Records are stored as JSON and expire after [`JOB_TTL_SECS`](super::JOB_TTL_SECS);
//! expired rows are filtered on read and pruned on write.

use crate::error::DatabaseError;
use crate::types::JobRecord;
use crate::{Error, Result};

use super::{Database, JOB_TTL_SECS};

impl Database {
    /// Insert or replace a job record, resetting its expiry
    pub async fn set_job(&self, job_id: &str, record: &JobRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let json = serde_json::to_string(record)?;

        sqlx::query("DELETE FROM jobs WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to prune expired jobs: {}",
                    e
                )))
            })?;

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, record, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                record = excluded.record,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(job_id)
        .bind(json)
        .bind(now + JOB_TTL_SECS)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set job: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a job record that has not expired
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let now = chrono::Utc::now().timestamp();

        let json: Option<String> =
            sqlx::query_scalar("SELECT record FROM jobs WHERE job_id = ? AND expires_at > ?")
                .bind(job_id)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get job: {}",
                        e
                    )))
                })?;

        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    /// List every job record that has not expired, keyed by job id
    pub async fn list_jobs(&self) -> Result<Vec<(String, JobRecord)>> {
        let now = chrono::Utc::now().timestamp();

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT job_id, record FROM jobs WHERE expires_at > ? ORDER BY job_id ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        rows.into_iter()
            .map(|(id, json)| Ok((id, serde_json::from_str(&json)?)))
            .collect()
    }
}
