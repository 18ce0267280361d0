//! Periodic feed polling.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::FeedManager;

/// Polls every feed on a fixed interval until cancelled
pub struct FeedScheduler {
    manager: Arc<FeedManager>,
    interval: Duration,
}

impl FeedScheduler {
    /// Scheduler using the manager's configured interval
    pub fn new(manager: Arc<FeedManager>) -> Self {
        let interval = manager.poll_interval();
        Self { manager, interval }
    }

    /// Override the interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll immediately, then once per interval, until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Feed scheduler started");
        loop {
            let added = tokio::select! {
                _ = cancel.cancelled() => break,
                added = self.manager.poll_feeds() => added,
            };
            if added > 0 {
                tracing::info!(added, "Feed poll added entries");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Feed scheduler stopped");
    }
}
