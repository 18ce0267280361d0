use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let mut conn = db.pool.acquire().await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    for table in [
        "feeds",
        "intents",
        "item_status",
        "jobs",
        "processed_markers",
        "schema_version",
        "seen_items",
        "upload_ledger",
    ] {
        assert!(
            tables.contains(&table.to_string()),
            "missing table {table}, found {tables:?}"
        );
    }

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_migrations_are_recorded_once() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.close().await;

    // Reopening must not re-run migrations
    let db = Database::new(temp_file.path()).await.unwrap();
    let versions: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version")
            .fetch_all(db.pool())
            .await
            .unwrap();

    assert_eq!(versions, vec![1, 2]);
    db.close().await;
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(db.pool())
        .await
        .unwrap();

    assert_eq!(mode.to_lowercase(), "wal");
    db.close().await;
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested/state/relay.db");

    let db = Database::new(&path).await.unwrap();
    assert!(path.exists());
    db.close().await;
}
