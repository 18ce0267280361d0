use crate::db::*;
use crate::types::{IntentRecord, SinkKind};
use tempfile::NamedTempFile;

async fn setup_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

#[tokio::test]
async fn test_seen_items_are_scoped_per_feed() {
    let (db, _temp) = setup_db().await;

    db.add_seen("https://a.example/rss", "x").await.unwrap();

    assert!(db.is_seen("https://a.example/rss", "x").await.unwrap());
    assert!(!db.is_seen("https://b.example/rss", "x").await.unwrap());
    assert!(!db.is_seen("https://a.example/rss", "y").await.unwrap());
}

#[tokio::test]
async fn test_add_seen_twice_is_harmless() {
    let (db, _temp) = setup_db().await;

    db.add_seen("feed", "x").await.unwrap();
    db.add_seen("feed", "x").await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_items")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_add_processed_reports_first_insert_only() {
    let (db, _temp) = setup_db().await;

    assert!(!db.is_processed("rd_ABC").await.unwrap());
    assert!(db.add_processed("rd_ABC").await.unwrap());
    assert!(!db.add_processed("rd_ABC").await.unwrap());
    assert!(db.is_processed("rd_ABC").await.unwrap());
}

#[tokio::test]
async fn test_intent_round_trip_and_overwrite() {
    let (db, _temp) = setup_db().await;

    assert!(db.get_intent("sb_HASH").await.unwrap().is_none());

    let intent = IntentRecord {
        sink_kind: SinkKind::ObjectStorage,
        owner_ref: Some("chat-42".to_string()),
        delete_after_upload: true,
    };
    db.set_intent("sb_HASH", &intent).await.unwrap();
    assert_eq!(db.get_intent("sb_HASH").await.unwrap(), Some(intent));

    let replaced = IntentRecord::default();
    db.set_intent("sb_HASH", &replaced).await.unwrap();
    assert_eq!(db.get_intent("sb_HASH").await.unwrap(), Some(replaced));
}
