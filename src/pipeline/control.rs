//! Manual acquisition and status queries.

use std::sync::Arc;

use crate::feeds::FeedManager;
use crate::jobs::JobRunner;
use crate::types::{BackendKind, IntentRecord, ItemStatusRecord, SinkKind, Stage, TransferId, TransferItem};
use crate::Result;

use super::TransferManager;

impl TransferManager {
    /// Hand a magnet or torrent link to a backend on behalf of `owner_ref`
    ///
    /// The backend is chosen by the router unless `forced`. Once the backend finishes,
    /// the completion monitor delivers the content to `sink`. Returns the backend and
    /// its external id.
    pub async fn acquire(
        &self,
        link: &str,
        forced: Option<BackendKind>,
        sink: SinkKind,
        owner_ref: Option<String>,
        delete_after_upload: bool,
    ) -> Result<(BackendKind, String)> {
        let intent = IntentRecord {
            sink_kind: sink,
            owner_ref,
            delete_after_upload,
        };
        let (backend, external_id) = self.feeds.acquire_link(link, forced, false, intent).await?;
        tracing::info!(backend = %backend, id = %external_id, "Link added to backend");
        Ok((backend, external_id))
    }

    /// Latest recorded stage of an item
    pub async fn item_status(&self, id: TransferId) -> Result<Option<ItemStatusRecord>> {
        self.state.get_item_status(id).await
    }

    /// Items whose latest stage is `stage`
    pub async fn items_in_stage(&self, stage: Stage) -> Result<Vec<ItemStatusRecord>> {
        self.state.list_item_status(stage).await
    }

    /// Items parked until storage frees up, oldest first
    pub async fn waiting_on_space(&self) -> Vec<TransferItem> {
        self.admission.pending().await
    }

    /// Feed management
    pub fn feeds(&self) -> &Arc<FeedManager> {
        &self.feeds
    }

    /// External downloader jobs
    pub fn jobs(&self) -> &JobRunner {
        &self.jobs
    }
}
