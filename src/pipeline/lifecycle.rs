//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::types::{Event, Stage};
use crate::Result;

use super::TransferManager;

/// How long shutdown waits for running transfers
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl TransferManager {
    /// Gracefully shut down the manager
    ///
    /// 1. Stops accepting new submissions
    /// 2. Cancels the background services
    /// 3. Fails every item still waiting on space with [`Event::TransferFailed`]
    /// 4. Waits up to 30 seconds for running transfers to finish
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Items are not persisted across restarts. The monitor sets a backend marker as soon
    /// as an item is submitted, so an item dropped here or abandoned after the timeout is
    /// not picked up again by a later cycle and needs a manual resubmit. The upload
    /// ledger still keeps a resubmit from delivering a file twice.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.workers.accepting_new.store(false, Ordering::SeqCst);
        self.workers.cancel.cancel();
        tracing::info!("Stopped accepting new transfers and cancelled background services");

        let dropped = self.admission.take_pending().await;
        if !dropped.is_empty() {
            tracing::warn!(count = dropped.len(), "Dropping transfers still waiting on space");
        }
        for item in dropped {
            let message = "dropped at shutdown while waiting on space".to_string();
            self.record_stage(&item, Stage::Error, Some(message.clone())).await;
            self.emit(Event::TransferFailed {
                id: item.id,
                name: item.display_name.clone(),
                error: message,
            });
        }

        let all_permits = u32::try_from(self.workers.max_workers).unwrap_or(u32::MAX);
        match tokio::time::timeout(
            SHUTDOWN_TIMEOUT,
            self.workers.concurrent_limit.acquire_many(all_permits),
        )
        .await
        {
            Ok(Ok(_permits)) => tracing::info!("All running transfers finished"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Worker pool closed while waiting"),
            Err(_) => tracing::warn!(
                "Timeout waiting for transfers to finish, proceeding with shutdown"
            ),
        }

        self.emit(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has started
    pub fn is_shutting_down(&self) -> bool {
        !self.workers.accepting_new.load(Ordering::SeqCst)
    }
}
