//! Completion monitor.
//!
//! Polls both acquisition backends on a fixed interval and submits finished content
//! into the transfer pipeline. Every backend item is keyed by its processed marker
//! (`rd_<id>`, `sb_<hash>`): once the marker is set the item is never submitted again,
//! across cycles and restarts.
//!
//! The marker is written after submission, not atomically with it. A crash in between
//! resubmits the item on the next cycle; the upload ledger then skips whatever was
//! already delivered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::backends::{AcquisitionBackend, RemoteItem, RemoteStatus, seedbox_complete};
use crate::state::StateStore;
use crate::types::{BackendKind, Event, IntentRecord, TransferItem};
use crate::Result;

/// Receiver of finished content
#[async_trait]
pub trait TransferSubmitter: Send + Sync {
    /// Hand an item to the pipeline
    async fn submit(&self, item: TransferItem) -> Result<()>;
}

/// Counts from one poll cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items submitted from the caching resolver
    pub resolver_submitted: usize,
    /// Items submitted from the seedbox
    pub seedbox_submitted: usize,
}

/// Polls backends and submits completed items exactly once (best effort)
pub struct CompletionMonitor {
    resolver: Option<Arc<dyn AcquisitionBackend>>,
    seedbox: Option<Arc<dyn AcquisitionBackend>>,
    state: Arc<dyn StateStore>,
    submitter: Arc<dyn TransferSubmitter>,
    event_tx: Option<broadcast::Sender<Event>>,
    interval: Duration,
}

impl CompletionMonitor {
    /// Create a monitor; an absent backend is simply not polled
    pub fn new(
        resolver: Option<Arc<dyn AcquisitionBackend>>,
        seedbox: Option<Arc<dyn AcquisitionBackend>>,
        state: Arc<dyn StateStore>,
        submitter: Arc<dyn TransferSubmitter>,
        interval: Duration,
    ) -> Self {
        Self {
            resolver,
            seedbox,
            state,
            submitter,
            event_tx: None,
            interval,
        }
    }

    /// Emit [`Event::BackendItemReady`] on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Poll until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Completion monitor started");
        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Completion monitor stopped");
    }

    /// One pass over both backends
    ///
    /// A failure listing one backend is logged and does not stop the other.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.check_resolver().await {
            Ok(n) => report.resolver_submitted = n,
            Err(e) => tracing::error!(error = %e, "Cache resolver check failed"),
        }
        match self.check_seedbox().await {
            Ok(n) => report.seedbox_submitted = n,
            Err(e) => tracing::error!(error = %e, "Seedbox check failed"),
        }

        report
    }

    /// Check the caching resolver, returning how many items were submitted
    ///
    /// Only a failed listing aborts the pass. An item that fails is logged, keeps its
    /// marker unset and is tried again next cycle; the items after it still run.
    pub async fn check_resolver(&self) -> Result<usize> {
        let Some(resolver) = &self.resolver else {
            return Ok(0);
        };

        let mut submitted = 0;
        for item in resolver.list().await? {
            match item.status {
                RemoteStatus::WaitingSelection => {
                    tracing::info!(id = %item.external_id, name = %item.name, "Selecting all files");
                    if let Err(e) = resolver.select_files(&item.external_id).await {
                        tracing::warn!(id = %item.external_id, error = %e, "File selection failed");
                    }
                }
                RemoteStatus::Ready => {
                    match self.submit_resolver_item(resolver.as_ref(), &item).await {
                        Ok(n) => submitted += n,
                        Err(e) => tracing::error!(
                            id = %item.external_id,
                            name = %item.name,
                            error = %e,
                            "Resolver item failed, retrying next cycle"
                        ),
                    }
                }
                _ => {}
            }
        }
        Ok(submitted)
    }

    async fn submit_resolver_item(
        &self,
        resolver: &dyn AcquisitionBackend,
        item: &RemoteItem,
    ) -> Result<usize> {
        let marker = BackendKind::CacheResolver.marker(&item.external_id);
        if self.state.is_processed(&marker).await? {
            return Ok(0);
        }
        tracing::info!(id = %item.external_id, name = %item.name, "Resolver item ready");
        self.emit_ready(BackendKind::CacheResolver, &item.external_id, &item.name);

        let intent = self.intent(&marker).await?;
        let mut submitted = 0;
        for link in resolver.get_links(&item.external_id).await? {
            let resolved = match resolver.resolve(&link).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::error!(link = %link, error = %e, "Failed to resolve link, skipping");
                    continue;
                }
            };
            let transfer = TransferItem::new(
                resolved.download_url,
                resolved.filename,
                intent.sink_kind,
                intent.owner_ref.clone(),
                resolved.filesize,
            );
            self.submit(transfer).await?;
            submitted += 1;
        }

        self.state.add_processed(&marker).await?;
        Ok(submitted)
    }

    /// Check the seedbox, returning how many items were submitted
    ///
    /// Failures are handled per item, as for the resolver.
    pub async fn check_seedbox(&self) -> Result<usize> {
        let Some(seedbox) = &self.seedbox else {
            return Ok(0);
        };

        let mut submitted = 0;
        for item in seedbox.list().await? {
            if !seedbox_complete(item.state.as_deref(), item.size, item.bytes_done) {
                continue;
            }
            match self.submit_seedbox_item(seedbox.as_ref(), &item).await {
                Ok(true) => submitted += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(
                    hash = %item.external_id,
                    name = %item.name,
                    error = %e,
                    "Seedbox item failed, retrying next cycle"
                ),
            }
        }
        Ok(submitted)
    }

    async fn submit_seedbox_item(
        &self,
        seedbox: &dyn AcquisitionBackend,
        item: &RemoteItem,
    ) -> Result<bool> {
        let marker = BackendKind::Seedbox.marker(&item.external_id);
        if self.state.is_processed(&marker).await? {
            return Ok(false);
        }

        let Some(base_path) = item.base_path.as_deref().filter(|p| !p.is_empty()) else {
            tracing::warn!(hash = %item.external_id, name = %item.name, "Seedbox item has no base path");
            return Ok(false);
        };
        tracing::info!(hash = %item.external_id, name = %item.name, "Seedbox item ready");
        self.emit_ready(BackendKind::Seedbox, &item.external_id, &item.name);

        let intent = self.intent(&marker).await?;
        let transfer = TransferItem::new(
            format!("sftp://{}", base_path),
            item.name.clone(),
            intent.sink_kind,
            intent.owner_ref.clone(),
            item.size,
        );
        self.submit(transfer).await?;
        self.state.add_processed(&marker).await?;

        if intent.delete_after_upload {
            match seedbox.delete(&item.external_id).await {
                Ok(()) => tracing::info!(hash = %item.external_id, "Removed torrent from seedbox"),
                Err(e) => tracing::warn!(hash = %item.external_id, error = %e, "Failed to remove torrent"),
            }
        }
        Ok(true)
    }

    async fn intent(&self, marker: &str) -> Result<IntentRecord> {
        Ok(self.state.get_intent(marker).await?.unwrap_or_default())
    }

    async fn submit(&self, item: TransferItem) -> Result<()> {
        let name = item.display_name.clone();
        // on failure the marker stays unset and the next cycle tries again
        self.submitter.submit(item).await.inspect_err(|e| {
            tracing::error!(name = %name, error = %e, "Submission failed");
        })
    }

    fn emit_ready(&self, backend: BackendKind, external_id: &str, name: &str) {
        if let Some(tx) = &self.event_tx {
            tx.send(Event::BackendItemReady {
                backend,
                external_id: external_id.to_string(),
                name: name.to_string(),
            })
            .ok();
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AddSource, ResolvedLink};
    use crate::db::Database;
    use crate::Error;
    use crate::types::SinkKind;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct FakeBackend {
        kind: Option<BackendKind>,
        items: Mutex<Vec<RemoteItem>>,
        links: Vec<String>,
        bad_links: Vec<String>,
        missing_ids: Vec<String>,
        selected: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        fail_list: bool,
    }

    #[async_trait]
    impl AcquisitionBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind.unwrap_or(BackendKind::CacheResolver)
        }

        async fn list(&self) -> Result<Vec<RemoteItem>> {
            if self.fail_list {
                return Err(Error::BackendAuth {
                    backend: self.kind().to_string(),
                });
            }
            Ok(self.items.lock().unwrap().clone())
        }

        async fn add(&self, _source: AddSource) -> Result<String> {
            Ok("new".to_string())
        }

        async fn delete(&self, external_id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(external_id.to_string());
            Ok(())
        }

        async fn select_files(&self, external_id: &str) -> Result<()> {
            self.selected.lock().unwrap().push(external_id.to_string());
            Ok(())
        }

        async fn get_links(&self, external_id: &str) -> Result<Vec<String>> {
            if self.missing_ids.iter().any(|id| id == external_id) {
                return Err(Error::BackendApi {
                    backend: self.kind().to_string(),
                    message: "HTTP 404".to_string(),
                });
            }
            Ok(self.links.clone())
        }

        async fn resolve(&self, link: &str) -> Result<ResolvedLink> {
            if self.bad_links.iter().any(|l| l == link) {
                return Err(Error::Other("hoster unavailable".to_string()));
            }
            Ok(ResolvedLink {
                download_url: format!("https://cdn.example{}", &link[link.rfind('/').unwrap()..]),
                filename: link.rsplit('/').next().unwrap().to_string(),
                filesize: 100,
            })
        }
    }

    #[derive(Default)]
    struct Collector {
        items: Mutex<Vec<TransferItem>>,
        rejected_names: Vec<String>,
    }

    #[async_trait]
    impl TransferSubmitter for Collector {
        async fn submit(&self, item: TransferItem) -> Result<()> {
            if self.rejected_names.contains(&item.display_name) {
                return Err(Error::ShuttingDown);
            }
            self.items.lock().unwrap().push(item);
            Ok(())
        }
    }

    fn item(id: &str, status: RemoteStatus) -> RemoteItem {
        RemoteItem {
            external_id: id.to_string(),
            name: format!("name-{id}"),
            status,
            size: 100,
            bytes_done: 100,
            base_path: None,
            state: None,
        }
    }

    fn seedbox_item(hash: &str, state: Option<&str>, base_path: Option<&str>) -> RemoteItem {
        RemoteItem {
            external_id: hash.to_string(),
            name: format!("name-{hash}"),
            status: RemoteStatus::Other(String::new()),
            size: 500,
            bytes_done: 500,
            base_path: base_path.map(str::to_string),
            state: state.map(str::to_string),
        }
    }

    async fn store() -> (Arc<dyn StateStore>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db: Arc<dyn StateStore> = Arc::new(Database::new(file.path()).await.unwrap());
        (db, file)
    }

    fn monitor(
        resolver: Option<Arc<FakeBackend>>,
        seedbox: Option<Arc<FakeBackend>>,
        state: Arc<dyn StateStore>,
        collector: Arc<Collector>,
    ) -> CompletionMonitor {
        CompletionMonitor::new(
            resolver.map(|r| r as Arc<dyn AcquisitionBackend>),
            seedbox.map(|s| s as Arc<dyn AcquisitionBackend>),
            state,
            collector,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn resolver_items_are_submitted_once_per_marker() {
        let (state, _db) = store().await;
        let resolver = Arc::new(FakeBackend {
            items: Mutex::new(vec![item("A", RemoteStatus::Ready)]),
            links: vec!["https://host/l/one.mkv".into(), "https://host/l/two.mkv".into()],
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        let monitor = monitor(Some(resolver), None, state.clone(), collector.clone());

        for _ in 0..3 {
            monitor.run_cycle().await;
        }

        let items = collector.items.lock().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_locator, "https://cdn.example/one.mkv");
        assert_eq!(items[0].sink_kind, SinkKind::Messaging, "default sink without intent");
        assert!(state.is_processed("rd_A").await.unwrap());
    }

    #[tokio::test]
    async fn failed_link_is_skipped_and_rest_submitted() {
        let (state, _db) = store().await;
        let resolver = Arc::new(FakeBackend {
            items: Mutex::new(vec![item("A", RemoteStatus::Ready)]),
            links: vec!["https://host/l/bad.mkv".into(), "https://host/l/good.mkv".into()],
            bad_links: vec!["https://host/l/bad.mkv".into()],
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        let monitor = monitor(Some(resolver), None, state.clone(), collector.clone());

        let report = monitor.run_cycle().await;
        assert_eq!(report.resolver_submitted, 1);
        assert_eq!(collector.items.lock().unwrap()[0].display_name, "good.mkv");
        assert!(state.is_processed("rd_A").await.unwrap());
    }

    #[tokio::test]
    async fn failing_resolver_item_does_not_block_the_rest() {
        let (state, _db) = store().await;
        let resolver = Arc::new(FakeBackend {
            items: Mutex::new(vec![
                item("bad", RemoteStatus::Ready),
                item("good", RemoteStatus::Ready),
            ]),
            links: vec!["https://host/l/good.mkv".into()],
            missing_ids: vec!["bad".into()],
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        let monitor = monitor(Some(resolver), None, state.clone(), collector.clone());

        for _ in 0..3 {
            monitor.run_cycle().await;
        }

        assert_eq!(collector.items.lock().unwrap().len(), 1);
        assert!(state.is_processed("rd_good").await.unwrap());
        assert!(!state.is_processed("rd_bad").await.unwrap());
    }

    #[tokio::test]
    async fn rejected_seedbox_submission_does_not_block_the_rest() {
        let (state, _db) = store().await;
        let seedbox = Arc::new(FakeBackend {
            kind: Some(BackendKind::Seedbox),
            items: Mutex::new(vec![
                seedbox_item("h1", Some("seeding"), Some("/data/one")),
                seedbox_item("h2", Some("seeding"), Some("/data/two")),
            ]),
            ..Default::default()
        });
        let collector = Arc::new(Collector {
            rejected_names: vec!["name-h1".to_string()],
            ..Default::default()
        });
        let monitor = monitor(None, Some(seedbox), state.clone(), collector.clone());

        let report = monitor.run_cycle().await;
        assert_eq!(report.seedbox_submitted, 1);
        assert_eq!(collector.items.lock().unwrap()[0].display_name, "name-h2");
        assert!(!state.is_processed("sb_h1").await.unwrap());
        assert!(state.is_processed("sb_h2").await.unwrap());
    }

    #[tokio::test]
    async fn waiting_selection_selects_all_files_without_submitting() {
        let (state, _db) = store().await;
        let resolver = Arc::new(FakeBackend {
            items: Mutex::new(vec![
                item("W", RemoteStatus::WaitingSelection),
                item("D", RemoteStatus::Downloading),
            ]),
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        let monitor = monitor(Some(resolver.clone()), None, state, collector.clone());

        monitor.run_cycle().await;
        assert_eq!(resolver.selected.lock().unwrap().as_slice(), &["W".to_string()]);
        assert!(collector.items.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn intent_decides_sink_and_owner() {
        let (state, _db) = store().await;
        state
            .set_intent(
                "rd_A",
                &IntentRecord {
                    sink_kind: SinkKind::ObjectStorage,
                    owner_ref: Some("chat-9".to_string()),
                    delete_after_upload: false,
                },
            )
            .await
            .unwrap();
        let resolver = Arc::new(FakeBackend {
            items: Mutex::new(vec![item("A", RemoteStatus::Ready)]),
            links: vec!["https://host/l/x.zip".into()],
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        monitor(Some(resolver), None, state, collector.clone())
            .run_cycle()
            .await;

        let items = collector.items.lock().unwrap();
        assert_eq!(items[0].sink_kind, SinkKind::ObjectStorage);
        assert_eq!(items[0].owner_ref.as_deref(), Some("chat-9"));
    }

    #[tokio::test]
    async fn seedbox_state_is_authoritative_over_sizes() {
        let (state, _db) = store().await;
        let seedbox = Arc::new(FakeBackend {
            kind: Some(BackendKind::Seedbox),
            items: Mutex::new(vec![
                // sizes match but the client says it is still hashing
                seedbox_item("H1", Some("hashing"), Some("/data/one")),
                seedbox_item("H2", Some("seeding"), Some("/data/two")),
                seedbox_item("H3", None, Some("/data/three")),
            ]),
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        monitor(None, Some(seedbox), state, collector.clone())
            .run_cycle()
            .await;

        let locators: Vec<_> = collector
            .items
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.source_locator.clone())
            .collect();
        assert_eq!(locators, vec!["sftp:///data/two", "sftp:///data/three"]);
    }

    #[tokio::test]
    async fn seedbox_item_without_base_path_is_left_unmarked() {
        let (state, _db) = store().await;
        let seedbox = Arc::new(FakeBackend {
            kind: Some(BackendKind::Seedbox),
            items: Mutex::new(vec![seedbox_item("H1", Some("seeding"), None)]),
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        monitor(None, Some(seedbox), state.clone(), collector.clone())
            .run_cycle()
            .await;

        assert!(collector.items.lock().unwrap().is_empty());
        assert!(!state.is_processed("sb_H1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_after_upload_removes_seedbox_torrent() {
        let (state, _db) = store().await;
        state
            .set_intent(
                "sb_H2",
                &IntentRecord {
                    sink_kind: SinkKind::Messaging,
                    owner_ref: None,
                    delete_after_upload: true,
                },
            )
            .await
            .unwrap();
        let seedbox = Arc::new(FakeBackend {
            kind: Some(BackendKind::Seedbox),
            items: Mutex::new(vec![seedbox_item("H2", Some("seeding"), Some("/data/two"))]),
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        monitor(None, Some(seedbox.clone()), state, collector)
            .run_cycle()
            .await;

        assert_eq!(seedbox.deleted.lock().unwrap().as_slice(), &["H2".to_string()]);
    }

    #[tokio::test]
    async fn one_backend_failing_does_not_stop_the_other() {
        let (state, _db) = store().await;
        let resolver = Arc::new(FakeBackend {
            fail_list: true,
            ..Default::default()
        });
        let seedbox = Arc::new(FakeBackend {
            kind: Some(BackendKind::Seedbox),
            items: Mutex::new(vec![seedbox_item("H2", Some("seeding"), Some("/data/two"))]),
            ..Default::default()
        });
        let collector = Arc::new(Collector::default());
        let report = monitor(Some(resolver), Some(seedbox), state, collector)
            .run_cycle()
            .await;
        assert_eq!(report.seedbox_submitted, 1);
    }

    #[tokio::test]
    async fn processed_marker_survives_restart() {
        let db_file = NamedTempFile::new().unwrap();
        let backend = || {
            Arc::new(FakeBackend {
                items: Mutex::new(vec![item("A", RemoteStatus::Ready)]),
                links: vec!["https://host/l/one.mkv".into()],
                ..Default::default()
            })
        };

        let collector = Arc::new(Collector::default());
        {
            let state: Arc<dyn StateStore> = Arc::new(Database::new(db_file.path()).await.unwrap());
            monitor(Some(backend()), None, state, collector.clone())
                .run_cycle()
                .await;
        }
        let state: Arc<dyn StateStore> = Arc::new(Database::new(db_file.path()).await.unwrap());
        monitor(Some(backend()), None, state, collector.clone())
            .run_cycle()
            .await;

        assert_eq!(collector.items.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (state, _db) = store().await;
        let monitor = Arc::new(monitor(None, None, state, Arc::new(Collector::default())));
        let cancel = CancellationToken::new();
        let task = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
