//! Background service starters: completion monitor and feed scheduler.

use std::sync::Arc;

use crate::feeds::FeedScheduler;
use crate::monitor::{CompletionMonitor, TransferSubmitter};

use super::TransferManager;

impl TransferManager {
    /// Start the completion monitor background task
    ///
    /// Stops when the manager shuts down.
    pub fn start_monitor(&self) -> tokio::task::JoinHandle<()> {
        if self.resolver.is_none() && self.seedbox.is_none() {
            tracing::info!("No acquisition backend configured, skipping completion monitor");
            return tokio::spawn(async {});
        }

        let monitor = CompletionMonitor::new(
            self.resolver.clone(),
            self.seedbox.clone(),
            self.state.clone(),
            Arc::new(self.clone()) as Arc<dyn TransferSubmitter>,
            self.config.monitor.poll_interval,
        )
        .with_events(self.event_tx.clone());
        let cancel = self.workers.cancel.child_token();

        let handle = tokio::spawn(async move {
            monitor.run(cancel).await;
        });
        tracing::info!("Completion monitor background task started");
        handle
    }

    /// Start the feed scheduler background task
    ///
    /// Feeds added later are picked up on the next poll.
    pub fn start_feed_scheduler(&self) -> tokio::task::JoinHandle<()> {
        if self.resolver.is_none() && self.seedbox.is_none() {
            tracing::info!("No acquisition backend configured, skipping feed scheduler");
            return tokio::spawn(async {});
        }

        let scheduler = FeedScheduler::new(self.feeds.clone());
        let cancel = self.workers.cancel.child_token();

        let handle = tokio::spawn(async move {
            scheduler.run(cancel).await;
        });
        tracing::info!("Feed scheduler background task started");
        handle
    }
}
