//! End-to-end tests of the transfer pipeline against mocked services
//!
//! A single wiremock server plays the cache resolver, the file hoster, the feed host and
//! the messaging bot API. The manager is built from configuration exactly as an
//! embedding application would build it.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test e2e_pipeline
//! ```

mod common;

use common::{
    CACHED_HASH, MOVIE_CONTENT, TEST_BOT_TOKEN, WaitResult, assert_completed, cached_magnet,
    collect_events_until, create_mock_manager, mock_config, mount_ready_torrent,
    rss_with_entries, wait_for_any_transfer,
};
use seedrelay::{
    BackendKind, Event, IntentRecord, SinkKind, Stage, TransferItem, TransferManager,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_send_document(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendDocument", TEST_BOT_TOKEN)))
        .and(body_string_contains("555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn finished_resolver_item_is_delivered_once() {
    let server = MockServer::start().await;
    mount_ready_torrent(&server, "T1", "Movie.2024.mkv").await;
    mount_send_document(&server, 1).await;

    let (manager, temp_dir) = create_mock_manager(&server.uri()).await.unwrap();
    manager
        .state
        .set_intent(
            &BackendKind::CacheResolver.marker("T1"),
            &IntentRecord {
                sink_kind: SinkKind::Messaging,
                owner_ref: Some("555".to_string()),
                delete_after_upload: false,
            },
        )
        .await
        .unwrap();

    let mut events = manager.subscribe();
    let monitor = manager.start_monitor();

    let (id, result) = wait_for_any_transfer(&mut events, Duration::from_secs(15)).await;
    assert_completed(&result);
    let id = id.unwrap();

    assert!(manager.state.is_processed("rd_T1").await.unwrap());
    let status = manager.item_status(id).await.unwrap().unwrap();
    assert_eq!(status.stage, Stage::Completed);
    assert_eq!(status.sink_kind, SinkKind::Messaging);

    // later cycles see the marker and submit nothing; the mock expects one upload
    let later = collect_events_until(&mut events, Duration::from_millis(800), |_| false).await;
    assert!(!later.iter().any(|e| matches!(e, Event::Queued { .. })));

    manager.shutdown().await.unwrap();
    monitor.await.unwrap();

    // the workspace is gone, only the download root remains
    let downloads = temp_dir.path().join("downloads");
    assert_eq!(std::fs::read_dir(&downloads).unwrap().count(), 0);
}

#[tokio::test]
async fn restart_resubmission_is_skipped_by_the_ledger() {
    let server = MockServer::start().await;
    mount_ready_torrent(&server, "T2", "Show.S01E01.mkv").await;
    mount_send_document(&server, 1).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let item = || {
        TransferItem::new(
            format!("{}/files/Show.S01E01.mkv", server.uri()),
            "Show.S01E01.mkv",
            SinkKind::Messaging,
            Some("555".to_string()),
            MOVIE_CONTENT.len() as u64,
        )
    };

    let manager = TransferManager::new(mock_config(&temp_dir, &server.uri()))
        .await
        .unwrap();
    let mut events = manager.subscribe();
    manager.submit(item()).await.unwrap();
    let (_, result) = wait_for_any_transfer(&mut events, Duration::from_secs(15)).await;
    assert_completed(&result);
    manager.shutdown().await.unwrap();
    drop(manager);

    // same state database, as after a crash between delivery and the marker write
    let restarted = TransferManager::new(mock_config(&temp_dir, &server.uri()))
        .await
        .unwrap();
    let mut events = restarted.subscribe();
    restarted.submit(item()).await.unwrap();

    let seen = collect_events_until(&mut events, Duration::from_secs(15), |e| {
        matches!(e, Event::TransferComplete { .. } | Event::TransferFailed { .. })
    })
    .await;
    assert!(seen.iter().any(|e| matches!(
        e,
        Event::Skipped { reason, .. } if reason.contains("already delivered")
    )));
    assert!(matches!(seen.last(), Some(Event::TransferComplete { .. })));
    assert!(!seen.iter().any(|e| matches!(e, Event::Uploading { .. })));
}

#[tokio::test]
async fn feed_entry_is_routed_to_the_cached_resolver() {
    let server = MockServer::start().await;

    // first poll sees only the old entry and marks it seen
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_entries(&[(
            "old",
            "magnet:?xt=urn:btih:ffffffffffffffffffffffffffffffffffffffff",
        )])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let magnet = cached_magnet();
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_entries(&[
            ("old", "magnet:?xt=urn:btih:ffffffffffffffffffffffffffffffffffffffff"),
            ("new", &magnet),
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/torrents/instantAvailability/{}", CACHED_HASH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            (CACHED_HASH): {"rd": [{"1": {"filename": "Cached.Release.mkv", "filesize": 10}}]},
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/torrents/addMagnet"))
        .and(body_string_contains(CACHED_HASH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "T9"})))
        .expect(1)
        .mount(&server)
        .await;

    let (manager, _temp_dir) = create_mock_manager(&server.uri()).await.unwrap();
    let mut events = manager.subscribe();
    manager
        .feeds()
        .add_feed(&format!("{}/feed.xml", server.uri()), None, false, None)
        .await
        .unwrap();

    assert_eq!(manager.feeds().poll_feeds().await, 0);
    assert_eq!(manager.feeds().poll_feeds().await, 1);

    let intent = manager.state.get_intent("rd_T9").await.unwrap().unwrap();
    assert_eq!(intent.sink_kind, SinkKind::Messaging);
    assert_eq!(intent.owner_ref.as_deref(), Some("555"));
    assert!(!intent.delete_after_upload);

    let seen = collect_events_until(&mut events, Duration::from_secs(2), |e| {
        matches!(e, Event::FeedItemAdded { .. })
    })
    .await;
    assert!(seen.iter().any(|e| matches!(e, Event::FeedItemAdded { .. })));

    // a third poll finds nothing new
    assert_eq!(manager.feeds().poll_feeds().await, 0);
}

#[tokio::test]
async fn failing_sink_leaves_no_ledger_entry() {
    let server = MockServer::start().await;
    mount_ready_torrent(&server, "T3", "Broken.mkv").await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendDocument", TEST_BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(400).set_body_string("Bad Request: chat not found"))
        .mount(&server)
        .await;

    let (manager, _temp_dir) = create_mock_manager(&server.uri()).await.unwrap();
    let mut events = manager.subscribe();

    let id = manager
        .submit(TransferItem::new(
            format!("{}/files/Broken.mkv", server.uri()),
            "Broken.mkv",
            SinkKind::Messaging,
            Some("999".to_string()),
            MOVIE_CONTENT.len() as u64,
        ))
        .await
        .unwrap();

    let (done, result) = wait_for_any_transfer(&mut events, Duration::from_secs(15)).await;
    assert_eq!(done, Some(id));
    match result {
        WaitResult::Failed(error) => assert!(error.contains("chat not found"), "{error}"),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert_eq!(
        manager.item_status(id).await.unwrap().unwrap().stage,
        Stage::Error
    );
    let hash = format!("{:x}", Sha256::digest(MOVIE_CONTENT));
    assert!(
        !manager
            .state
            .is_uploaded(&hash, SinkKind::Messaging)
            .await
            .unwrap()
    );
}
