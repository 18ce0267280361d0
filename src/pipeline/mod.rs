//! Transfer pipeline split into focused submodules.
//!
//! The [`TransferManager`] struct and its methods are organized by domain:
//! - [`queue`] - submission, admission and the worker pool
//! - [`transfer_task`] - fetch, package and deliver one item
//! - [`control`] - manual acquisition and status queries
//! - [`services`] - background service starters
//! - [`lifecycle`] - shutdown coordination

mod control;
mod lifecycle;
mod queue;
mod services;
mod transfer_task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionQueue, DiskSpaceProbe, SpaceProbe};
use crate::backends::{AcquisitionBackend, DebridClient, SeedboxClient};
use crate::config::Config;
use crate::feeds::FeedManager;
use crate::fetcher::Fetcher;
use crate::jobs::JobRunner;
use crate::packager::{MediaTools, Packager};
use crate::sinks::SinkDispatcher;
use crate::state::{StateStore, open_state_store};
use crate::types::Event;
use crate::{Error, Result};

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 1000;

/// Worker pool and shutdown state
#[derive(Clone)]
pub(crate) struct WorkerState {
    /// Limits concurrently running transfers (`storage.max_concurrent_transfers`)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Permits in `concurrent_limit`
    pub(crate) max_workers: usize,
    /// Cleared during shutdown; submissions are rejected afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent token of every background service
    pub(crate) cancel: CancellationToken,
}

/// Everything the manager drives, built from configuration or supplied directly
pub struct Components {
    /// Shared persistent state
    pub state: Arc<dyn StateStore>,
    /// Caching resolver, when configured
    pub resolver: Option<Arc<dyn AcquisitionBackend>>,
    /// Seedbox, when configured
    pub seedbox: Option<Arc<dyn AcquisitionBackend>>,
    /// Source fetcher
    pub fetcher: Fetcher,
    /// Delivery sinks
    pub sinks: SinkDispatcher,
    /// Free-space measurement for admission
    pub space_probe: Arc<dyn SpaceProbe>,
    /// ffmpeg / ffprobe used for splitting
    pub media_tools: MediaTools,
}

impl Components {
    /// Build every configured component
    ///
    /// A backend or sink without configuration is left out and logged.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let state = open_state_store(&config.persistence).await?;

        let resolver = match &config.debrid {
            Some(debrid) => Some(Arc::new(
                DebridClient::new(debrid)?.with_list_limit(config.monitor.list_limit),
            ) as Arc<dyn AcquisitionBackend>),
            None => {
                tracing::info!("Cache resolver not configured");
                None
            }
        };
        let seedbox = match &config.seedbox {
            Some(seedbox) => {
                Some(Arc::new(SeedboxClient::new(seedbox)?) as Arc<dyn AcquisitionBackend>)
            }
            None => {
                tracing::info!("Seedbox not configured");
                None
            }
        };

        let media_tools = MediaTools::from_config(&config.tools);
        Ok(Self {
            state,
            resolver,
            seedbox,
            fetcher: Fetcher::new(config.retry.clone(), config.seedbox.as_ref())?,
            sinks: SinkDispatcher::from_config(config, media_tools.clone())?,
            space_probe: Arc::new(DiskSpaceProbe),
            media_tools,
        })
    }
}

/// Transfer orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TransferManager {
    /// Shared persistent state
    pub state: Arc<dyn StateStore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) config: Arc<Config>,
    pub(crate) resolver: Option<Arc<dyn AcquisitionBackend>>,
    pub(crate) seedbox: Option<Arc<dyn AcquisitionBackend>>,
    pub(crate) fetcher: Fetcher,
    pub(crate) packager: Packager,
    pub(crate) sinks: SinkDispatcher,
    pub(crate) admission: Arc<AdmissionQueue>,
    pub(crate) feeds: Arc<FeedManager>,
    pub(crate) jobs: JobRunner,
    pub(crate) workers: WorkerState,
}

impl TransferManager {
    /// Create a manager from configuration
    ///
    /// Creates the download directory, opens the state store and builds every
    /// configured backend and sink.
    pub async fn new(config: Config) -> Result<Self> {
        let components = Components::from_config(&config).await?;
        Self::with_components(config, components).await
    }

    /// Create a manager around explicit components
    pub async fn with_components(config: Config, components: Components) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.storage.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        let Components {
            state,
            resolver,
            seedbox,
            fetcher,
            sinks,
            space_probe,
            media_tools,
        } = components;

        let admission = Arc::new(AdmissionQueue::new(
            space_probe,
            config.storage.download_dir.clone(),
            config.storage.min_free_space,
        ));
        let packager = Packager::new(state.clone(), config.packaging.clone(), media_tools);
        let feeds = FeedManager::load(
            state.clone(),
            resolver.clone(),
            seedbox.clone(),
            config.feeds.clone(),
        )
        .await?
        .with_events(event_tx.clone());
        let jobs = JobRunner::new(state.clone(), &config.tools).with_events(event_tx.clone());

        let max_workers = config.storage.max_concurrent_transfers.max(1);
        let workers = WorkerState {
            concurrent_limit: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            accepting_new: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        };

        tracing::info!(
            download_dir = %config.storage.download_dir.display(),
            max_workers,
            resolver = resolver.is_some(),
            seedbox = seedbox.is_some(),
            "Transfer manager ready"
        );

        Ok(Self {
            state,
            event_tx,
            config: Arc::new(config),
            resolver,
            seedbox,
            fetcher,
            packager,
            sinks,
            admission,
            feeds: Arc::new(feeds),
            jobs,
            workers,
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Configuration the manager was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, event: Event) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
