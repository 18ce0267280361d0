//! Shared test helpers for building TransferManager instances in tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{TempDir, tempdir};
use tokio::sync::broadcast;

use crate::admission::SpaceProbe;
use crate::backends::AcquisitionBackend;
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::fetcher::Fetcher;
use crate::packager::MediaTools;
use crate::sinks::{Sink, SinkDispatcher};
use crate::state::StateStore;
use crate::types::{Event, SinkKind, TransferId};
use crate::{Error, Result};

use super::{Components, TransferManager};

pub(crate) const GIB: u64 = 1024 * 1024 * 1024;

/// Free space that tests can change at will
pub(crate) struct FixedSpace {
    pub(crate) free: AtomicU64,
}

impl FixedSpace {
    pub(crate) fn new(free: u64) -> Arc<Self> {
        Arc::new(Self {
            free: AtomicU64::new(free),
        })
    }
}

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.free.load(Ordering::SeqCst))
    }
}

/// One recorded delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Delivered {
    pub(crate) name: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) owner_ref: Option<String>,
}

/// Sink that keeps the bytes of everything delivered to it
pub(crate) struct RecordingSink {
    kind: SinkKind,
    max_object_size: Option<u64>,
    pub(crate) fail: AtomicBool,
    pub(crate) delivered: Mutex<Vec<Delivered>>,
}

impl RecordingSink {
    pub(crate) fn new(kind: SinkKind, max_object_size: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            max_object_size,
            fail: AtomicBool::new(false),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn max_object_size(&self) -> Option<u64> {
        self.max_object_size
    }

    async fn deliver(&self, file: &Path, owner_ref: Option<&str>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Sink {
                sink: self.kind.to_string(),
                message: "refused".to_string(),
            });
        }
        let bytes = tokio::fs::read(file).await?;
        self.delivered.lock().unwrap().push(Delivered {
            name: file.file_name().unwrap().to_string_lossy().into_owned(),
            bytes,
            owner_ref: owner_ref.map(str::to_string),
        });
        Ok(())
    }
}

/// Retry settings that keep failing tests fast
pub(crate) fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

pub(crate) struct TestManager {
    pub(crate) manager: TransferManager,
    pub(crate) space: Arc<FixedSpace>,
    pub(crate) download_dir: PathBuf,
    pub(crate) _temp: TempDir,
}

/// Options for [`create_test_manager`]
pub(crate) struct TestSetup {
    pub(crate) messaging: Option<Arc<RecordingSink>>,
    pub(crate) object_store: Option<Arc<RecordingSink>>,
    pub(crate) seedbox: Option<Arc<dyn AcquisitionBackend>>,
    pub(crate) free_space: u64,
    pub(crate) chunk_size: u64,
}

impl Default for TestSetup {
    fn default() -> Self {
        Self {
            messaging: None,
            object_store: None,
            seedbox: None,
            free_space: 100 * GIB,
            chunk_size: 1900 * 1024 * 1024,
        }
    }
}

/// Build a manager on a temp directory with a SQLite store and the given sinks
pub(crate) async fn create_test_manager(setup: TestSetup) -> TestManager {
    let temp = tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.database_path = temp.path().join("test.db");
    config.storage.download_dir = temp.path().join("downloads");
    config.storage.max_concurrent_transfers = 2;
    config.packaging.chunk_size = setup.chunk_size;
    config.retry = fast_retry();

    let state: Arc<dyn StateStore> = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let space = FixedSpace::new(setup.free_space);
    let components = Components {
        state,
        resolver: None,
        seedbox: setup.seedbox,
        fetcher: Fetcher::new(config.retry.clone(), None).unwrap(),
        sinks: SinkDispatcher::new(
            setup.messaging.map(|s| s as Arc<dyn Sink>),
            setup.object_store.map(|s| s as Arc<dyn Sink>),
        ),
        space_probe: space.clone(),
        media_tools: MediaTools::none(),
    };

    let download_dir = config.storage.download_dir.clone();
    let manager = TransferManager::with_components(config, components)
        .await
        .unwrap();
    TestManager {
        manager,
        space,
        download_dir,
        _temp: temp,
    }
}

/// Collect events for `id` until it completes or fails
pub(crate) async fn events_until_done(
    rx: &mut broadcast::Receiver<Event>,
    id: TransferId,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for transfer events")
            .unwrap();
        let done = matches!(
            &event,
            Event::TransferComplete { id: done, .. } | Event::TransferFailed { id: done, .. }
                if *done == id
        );
        seen.push(event);
        if done {
            return seen;
        }
    }
}
