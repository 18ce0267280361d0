//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        Self::execute_ddl(
            &mut conn,
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
            "create schema_version table",
        )
        .await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Run `body` inside BEGIN/COMMIT, rolling back on failure, then record `version`
    async fn apply_migration(
        conn: &mut SqliteConnection,
        version: i32,
        statements: &[(&str, &str)],
    ) -> Result<()> {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            for (sql, what) in statements {
                Self::execute_ddl(conn, sql, what).await?;
            }
            Self::record_migration(conn, version).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Migration v1: idempotency sets, intents, jobs, upload ledger and feeds
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        Self::apply_migration(
            conn,
            1,
            &[
                (
                    r#"
                    CREATE TABLE seen_items (
                        feed_url TEXT NOT NULL,
                        item_id TEXT NOT NULL,
                        seen_at INTEGER NOT NULL,
                        PRIMARY KEY (feed_url, item_id)
                    )
                    "#,
                    "create seen_items table",
                ),
                (
                    r#"
                    CREATE TABLE processed_markers (
                        marker TEXT PRIMARY KEY,
                        processed_at INTEGER NOT NULL
                    )
                    "#,
                    "create processed_markers table",
                ),
                (
                    r#"
                    CREATE TABLE intents (
                        marker TEXT PRIMARY KEY,
                        sink_kind TEXT NOT NULL,
                        owner_ref TEXT,
                        delete_after_upload INTEGER NOT NULL DEFAULT 0,
                        created_at INTEGER NOT NULL
                    )
                    "#,
                    "create intents table",
                ),
                (
                    r#"
                    CREATE TABLE jobs (
                        job_id TEXT PRIMARY KEY,
                        record TEXT NOT NULL,
                        expires_at INTEGER NOT NULL
                    )
                    "#,
                    "create jobs table",
                ),
                (
                    r#"
                    CREATE TABLE upload_ledger (
                        content_hash TEXT NOT NULL,
                        sink_kind TEXT NOT NULL,
                        metadata TEXT NOT NULL,
                        delivered_at INTEGER NOT NULL,
                        PRIMARY KEY (content_hash, sink_kind)
                    )
                    "#,
                    "create upload_ledger table",
                ),
                (
                    r#"
                    CREATE TABLE feeds (
                        url TEXT PRIMARY KEY,
                        position INTEGER NOT NULL,
                        config TEXT NOT NULL
                    )
                    "#,
                    "create feeds table",
                ),
            ],
        )
        .await
    }

    /// Migration v2: per-item stage tracking with a reverse index by stage
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        Self::apply_migration(
            conn,
            2,
            &[
                (
                    r#"
                    CREATE TABLE item_status (
                        item_id INTEGER PRIMARY KEY,
                        name TEXT NOT NULL,
                        stage INTEGER NOT NULL,
                        sink_kind TEXT NOT NULL,
                        error TEXT,
                        updated_at INTEGER NOT NULL
                    )
                    "#,
                    "create item_status table",
                ),
                (
                    "CREATE INDEX idx_item_status_stage ON item_status(stage, updated_at)",
                    "create item_status index",
                ),
            ],
        )
        .await
    }

    async fn execute_ddl(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
