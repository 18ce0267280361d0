//! Submission, admission and the worker pool.

use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::Utc;

use crate::admission::Admission;
use crate::monitor::TransferSubmitter;
use crate::types::{Event, ItemStatusRecord, Stage, TransferId, TransferItem};
use crate::{Error, Result};

use super::TransferManager;

impl TransferManager {
    /// Submit an item for transfer
    ///
    /// The item starts as soon as a worker is free when storage allows it, otherwise it
    /// waits in the admission backlog and [`Event::WaitingOnSpace`] is emitted.
    pub async fn submit(&self, item: TransferItem) -> Result<TransferId> {
        if !self.workers.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = item.id;
        let required = item.expected_size;
        self.record_stage(&item, Stage::Enqueued, None).await;

        let parked = item.clone();
        match self.admission.enqueue(item).await {
            Admission::ProcessNow(item) => {
                tracing::info!(item = %id, name = %item.display_name, "Transfer admitted");
                self.emit(Event::Queued {
                    id,
                    name: item.display_name.clone(),
                });
                self.spawn_worker(item);
            }
            Admission::Queued => {
                self.record_stage(&parked, Stage::WaitingOnSpace, None).await;
                self.emit(Event::WaitingOnSpace { id, required });
            }
        }

        Ok(id)
    }

    /// Run `item` on the worker pool
    pub(crate) fn spawn_worker(&self, item: TransferItem) {
        let manager = self.clone();
        tokio::spawn(async move {
            let Ok(permit) = manager.workers.concurrent_limit.clone().acquire_owned().await else {
                return;
            };
            if !manager.workers.accepting_new.load(Ordering::SeqCst) {
                tracing::info!(item = %item.id, "Shutting down, transfer not started");
                return;
            }

            manager.run_transfer(item).await;
            drop(permit);
            manager.drain_backlog().await;
        });
    }

    /// Start the oldest parked item that now fits, if any
    ///
    /// Runs after every completed transfer. Returns whether an item was started.
    pub async fn drain_backlog(&self) -> bool {
        if !self.workers.accepting_new.load(Ordering::SeqCst) {
            return false;
        }
        let Some(item) = self.admission.dequeue().await else {
            return false;
        };

        tracing::info!(item = %item.id, name = %item.display_name, "Space available, starting parked transfer");
        self.emit(Event::Queued {
            id: item.id,
            name: item.display_name.clone(),
        });
        self.spawn_worker(item);
        true
    }

    /// Persist the latest stage of an item; failures are logged only
    pub(crate) async fn record_stage(&self, item: &TransferItem, stage: Stage, error: Option<String>) {
        let record = ItemStatusRecord {
            item_id: item.id,
            name: item.display_name.clone(),
            stage,
            sink_kind: item.sink_kind,
            error,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.state.set_item_status(&record).await {
            tracing::warn!(item = %item.id, stage = ?stage, error = %e, "Failed to record item status");
        }
    }
}

#[async_trait]
impl TransferSubmitter for TransferManager {
    async fn submit(&self, item: TransferItem) -> Result<()> {
        TransferManager::submit(self, item).await.map(|_| ())
    }
}
