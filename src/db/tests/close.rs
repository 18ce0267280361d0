use crate::db::*;
use tempfile::NamedTempFile;

/// Querying after the pool is closed returns an error rather than hanging or panicking.
#[tokio::test]
async fn test_query_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.add_processed("rd_ABC").await.unwrap());

    db.pool().close().await;

    let result = db.is_processed("rd_ABC").await;
    assert!(
        result.is_err(),
        "is_processed after pool close should return an error, got: {:?}",
        result
    );
}

/// State written before close is visible after reopening the same file.
#[tokio::test]
async fn test_state_survives_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.add_processed("sb_HASH").await.unwrap();
    db.add_seen("https://example.com/rss", "entry-1").await.unwrap();
    db.close().await;

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(db.is_processed("sb_HASH").await.unwrap());
    assert!(db.is_seen("https://example.com/rss", "entry-1").await.unwrap());
    db.close().await;
}
