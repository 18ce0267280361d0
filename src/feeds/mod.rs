//! Syndication feed polling.
//!
//! [`FeedManager`] keeps the list of feeds, polls them for torrent-like entries and
//! hands new ones to an acquisition backend picked by the [`Router`]. The delivery
//! intent is recorded under the backend-prefixed id, so the completion monitor knows
//! where the content goes once the backend finishes it.
//!
//! The first poll of a feed only remembers what is already there. Entries published
//! before the previous poll are remembered without being added. An entry is
//! remembered after a successful add only, so a failed add is retried next time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};

use crate::backends::{AcquisitionBackend, AddSource};
use crate::config::FeedsConfig;
use crate::router::Router;
use crate::state::StateStore;
use crate::types::{BackendKind, Event, FeedConfig, IntentRecord};
use crate::{Error, Result};

mod parse;
pub mod scheduler;

pub use parse::{FeedEntry, TORRENT_MIME, parse_feed};
pub use scheduler::FeedScheduler;

/// Manages feeds and turns new entries into backend acquisitions
pub struct FeedManager {
    state: Arc<dyn StateStore>,
    router: Router,
    resolver: Option<Arc<dyn AcquisitionBackend>>,
    seedbox: Option<Arc<dyn AcquisitionBackend>>,
    http: reqwest::Client,
    config: FeedsConfig,
    feeds: Mutex<Vec<FeedConfig>>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl FeedManager {
    /// Load the persisted feeds and build a manager
    pub async fn load(
        state: Arc<dyn StateStore>,
        resolver: Option<Arc<dyn AcquisitionBackend>>,
        seedbox: Option<Arc<dyn AcquisitionBackend>>,
        config: FeedsConfig,
    ) -> Result<Self> {
        let feeds = state.get_feeds().await?;
        tracing::info!(count = feeds.len(), "Loaded feeds");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("seedrelay")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            state,
            router: Router::new(resolver.clone()),
            resolver,
            seedbox,
            http,
            config,
            feeds: Mutex::new(feeds),
            event_tx: None,
        })
    }

    /// Emit [`Event::FeedItemAdded`] on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Poll interval from configuration
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Add a feed
    ///
    /// `delete_after_upload` overrides the global default for seedbox acquisitions.
    pub async fn add_feed(
        &self,
        url: &str,
        forced_backend: Option<BackendKind>,
        private: bool,
        delete_after_upload: Option<bool>,
    ) -> Result<FeedConfig> {
        let mut feeds = self.feeds.lock().await;
        if feeds.iter().any(|f| f.url == url) {
            return Err(Error::Config {
                message: format!("feed already exists: {}", url),
                key: Some("feeds".to_string()),
            });
        }

        let mut feed = FeedConfig::new(url);
        feed.forced_backend = forced_backend;
        feed.private_flag = private;
        feed.delete_after_upload = Some(delete_after_upload.unwrap_or(self.config.delete_after_upload));

        feeds.push(feed.clone());
        self.state.save_feeds(&feeds).await?;
        tracing::info!(url = %url, backend = ?forced_backend, private, "Added feed");
        Ok(feed)
    }

    /// Remove a feed, returning whether it existed
    pub async fn remove_feed(&self, url: &str) -> Result<bool> {
        let mut feeds = self.feeds.lock().await;
        let before = feeds.len();
        feeds.retain(|f| f.url != url);
        let removed = feeds.len() != before;
        if removed {
            self.state.save_feeds(&feeds).await?;
            tracing::info!(url = %url, "Removed feed");
        }
        Ok(removed)
    }

    /// Snapshot of every feed
    pub async fn list_feeds(&self) -> Vec<FeedConfig> {
        self.feeds.lock().await.clone()
    }

    /// Poll every feed once, returning how many entries were added to a backend
    ///
    /// A failing feed is logged and does not stop the others.
    pub async fn poll_feeds(&self) -> usize {
        let snapshot = self.list_feeds().await;
        let mut total = 0;

        for mut feed in snapshot {
            match self.poll_feed(&mut feed).await {
                Ok(added) => {
                    total += added;
                    if let Err(e) = self.store_polled(feed).await {
                        tracing::error!(error = %e, "Failed to save feed state");
                    }
                }
                Err(e) => tracing::error!(url = %feed.url, error = %e, "Error polling feed"),
            }
        }

        total
    }

    /// Write back a polled feed unless it was removed meanwhile
    async fn store_polled(&self, polled: FeedConfig) -> Result<()> {
        let mut feeds = self.feeds.lock().await;
        let Some(slot) = feeds.iter_mut().find(|f| f.url == polled.url) else {
            return Ok(());
        };
        slot.seen_item_ids = polled.seen_item_ids;
        slot.last_check = polled.last_check;
        self.state.save_feeds(&feeds).await
    }

    /// Poll one feed, updating its seen ids and `last_check` in place
    pub async fn poll_feed(&self, feed: &mut FeedConfig) -> Result<usize> {
        tracing::info!(url = %feed.url, "Polling feed");
        let started = Utc::now();
        let entries = self.fetch_entries(&feed.url).await?;
        if entries.is_empty() {
            tracing::warn!(url = %feed.url, "No torrent entries in feed");
        }

        let mut added = 0;
        for entry in entries {
            if self.already_seen(feed, &entry.entry_id).await {
                continue;
            }

            let Some(last_check) = feed.last_check else {
                self.remember(feed, &entry.entry_id).await;
                continue;
            };
            if entry.published.is_some_and(|published| published <= last_check) {
                self.remember(feed, &entry.entry_id).await;
                continue;
            }

            tracing::info!(title = %entry.title, "New feed entry");
            match self.acquire(feed, &entry).await {
                Ok(backend) => {
                    added += 1;
                    self.remember(feed, &entry.entry_id).await;
                    self.emit(Event::FeedItemAdded {
                        feed_url: feed.url.clone(),
                        title: entry.title.clone(),
                        backend,
                    });
                    if !self.config.api_delay.is_zero() {
                        tokio::time::sleep(self.config.api_delay).await;
                    }
                }
                Err(e) => {
                    tracing::error!(title = %entry.title, error = %e, "Failed to add feed entry");
                }
            }
        }

        feed.last_check = Some(started);
        tracing::info!(url = %feed.url, added, "Feed polled");
        Ok(added)
    }

    async fn fetch_entries(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content = response.text().await?;
        parse_feed(&content)
    }

    async fn already_seen(&self, feed: &FeedConfig, entry_id: &str) -> bool {
        if feed.has_seen(entry_id) {
            return true;
        }
        match self.state.is_seen(&feed.url, entry_id).await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::warn!(error = %e, "Seen-set lookup failed, using feed state only");
                false
            }
        }
    }

    async fn remember(&self, feed: &mut FeedConfig, entry_id: &str) {
        feed.mark_seen(entry_id);
        if let Err(e) = self.state.add_seen(&feed.url, entry_id).await {
            tracing::warn!(error = %e, "Failed to persist seen entry");
        }
    }

    /// Route an entry, add it to the chosen backend and record the intent
    async fn acquire(&self, feed: &FeedConfig, entry: &FeedEntry) -> Result<BackendKind> {
        let intent = IntentRecord {
            sink_kind: self.config.default_sink,
            owner_ref: self.config.default_owner.clone(),
            delete_after_upload: feed
                .delete_after_upload
                .unwrap_or(self.config.delete_after_upload),
        };
        let (kind, external_id) = self
            .acquire_link(&entry.candidate, feed.forced_backend, feed.private_flag, intent)
            .await?;
        tracing::info!(backend = %kind, id = %external_id, title = %entry.title, "Feed entry added to backend");
        Ok(kind)
    }

    /// Route `link`, add it to the chosen backend and store `intent` under its marker
    ///
    /// Returns the backend and its external id. `delete_after_upload` only applies to
    /// the seedbox; the resolver keeps nothing around worth deleting.
    pub async fn acquire_link(
        &self,
        link: &str,
        forced: Option<BackendKind>,
        private: bool,
        intent: IntentRecord,
    ) -> Result<(BackendKind, String)> {
        let kind = self.router.route(forced, private, link).await;
        let backend = match kind {
            BackendKind::CacheResolver => self.resolver.as_ref(),
            BackendKind::Seedbox => self.seedbox.as_ref(),
        }
        .ok_or_else(|| Error::NotConfigured(format!("{} backend", kind)))?;

        let external_id = backend.add(AddSource::from_link(link)).await?;

        let intent = IntentRecord {
            delete_after_upload: kind == BackendKind::Seedbox && intent.delete_after_upload,
            ..intent
        };
        self.state.set_intent(&kind.marker(&external_id), &intent).await?;
        Ok((kind, external_id))
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // no subscribers is fine
            let _ = tx.send(event);
        }
    }
}
