//! Fetch, package and deliver one transfer item.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fetcher::{FetchProgress, ProgressFn};
use crate::packager::{PackageOutcome, PackagedFile};
use crate::types::{Event, Stage, TransferId, TransferItem};
use crate::utils::safe_file_name;
use crate::Result;

use super::TransferManager;

impl TransferManager {
    /// Process one item to completion or failure
    ///
    /// The item gets its own workspace under the download directory, removed
    /// afterwards whatever the outcome. Nothing is retried at this level. A failed
    /// item is reported and needs a manual resubmit, since the monitor marked its
    /// backend item processed when it was submitted.
    pub(crate) async fn run_transfer(&self, item: TransferItem) {
        let workspace = self.workspace(item.id);
        tracing::info!(item = %item.id, name = %item.display_name, sink = %item.sink_kind, "Transfer started");

        match self.process(&item, &workspace).await {
            Ok(()) => {
                self.record_stage(&item, Stage::Completed, None).await;
                tracing::info!(item = %item.id, name = %item.display_name, "Transfer complete");
                self.emit(Event::TransferComplete {
                    id: item.id,
                    name: item.display_name.clone(),
                });
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(item = %item.id, name = %item.display_name, error = %message, "Transfer failed");
                self.record_stage(&item, Stage::Error, Some(message.clone())).await;
                self.emit(Event::TransferFailed {
                    id: item.id,
                    name: item.display_name.clone(),
                    error: message,
                });
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %workspace.display(), error = %e, "Failed to clean up workspace");
        }
    }

    fn workspace(&self, id: TransferId) -> PathBuf {
        self.config.storage.download_dir.join(id.to_string())
    }

    async fn process(&self, item: &TransferItem, workspace: &Path) -> Result<()> {
        // an unconfigured sink fails before anything is fetched
        let max_object_size = self.sinks.max_object_size(item.sink_kind)?;

        self.record_stage(item, Stage::Downloading, None).await;
        let destination = workspace.join(safe_file_name(&item.display_name));
        let root = self
            .fetcher
            .get(
                &item.source_locator,
                &destination,
                item.expected_size,
                self.progress_events(item.id),
            )
            .await?;

        self.record_stage(item, Stage::Packaging, None).await;
        self.emit(Event::Packaging { id: item.id });
        let collected = self.packager.collect(&root, item.sink_kind).await?;
        for skipped in &collected.skipped {
            self.emit(Event::Skipped {
                id: item.id,
                file: display_name(&skipped.path),
                reason: skipped.reason.clone(),
            });
        }

        let mut uploading = false;
        for file in &collected.files {
            match self
                .packager
                .prepare(file, item.sink_kind, max_object_size)
                .await?
            {
                PackageOutcome::Duplicate { file, .. } => {
                    self.emit(Event::Skipped {
                        id: item.id,
                        file: display_name(&file),
                        reason: format!("already delivered to {}", item.sink_kind),
                    });
                }
                PackageOutcome::Ready(packaged) => {
                    if !uploading {
                        self.record_stage(item, Stage::Uploading, None).await;
                        uploading = true;
                    }
                    self.deliver_parts(item, &packaged).await?;
                    self.packager
                        .record_delivery(&packaged, item.sink_kind)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Deliver every part in order, deleting each once it went through
    async fn deliver_parts(&self, item: &TransferItem, packaged: &PackagedFile) -> Result<()> {
        let total_parts = packaged.parts.len();
        for (index, part) in packaged.parts.iter().enumerate() {
            self.emit(Event::Uploading {
                id: item.id,
                file: display_name(part),
                part: index + 1,
                total_parts,
            });
            tracing::info!(
                item = %item.id,
                file = %display_name(part),
                part = index + 1,
                total_parts,
                "Delivering"
            );
            self.sinks
                .deliver(part, item.owner_ref.as_deref(), item.sink_kind)
                .await?;
            tokio::fs::remove_file(part).await?;
        }
        Ok(())
    }

    fn progress_events(&self, id: TransferId) -> ProgressFn {
        let tx = self.event_tx.clone();
        Arc::new(move |progress| {
            let event = match progress {
                FetchProgress::Percent(percent) => Event::Downloading { id, percent },
                FetchProgress::Files { done, total } => Event::FetchProgress {
                    id,
                    files_done: done,
                    files_total: total,
                },
            };
            let _ = tx.send(event);
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
