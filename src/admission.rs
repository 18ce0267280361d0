//! Storage-aware admission control.
//!
//! New work is admitted only while the download volume keeps `min_free_space` bytes
//! free after accounting for the item's expected size. Items that do not fit wait in a
//! FIFO backlog which is rescanned (first fit) whenever a transfer completes.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::TransferItem;

/// Source of free-space measurements for a path
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to unprivileged users on the volume holding `path`
    fn available_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

/// [`SpaceProbe`] that asks the filesystem
///
/// When `path` does not exist yet its parent directory is measured instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn available_bytes(&self, path: &Path) -> std::io::Result<u64> {
        let check_path = if path.exists() {
            path
        } else {
            path.parent().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Cannot determine parent directory of '{}'", path.display()),
                )
            })?
        };
        crate::utils::get_available_space(check_path)
    }
}

/// Outcome of [`AdmissionQueue::enqueue`]
#[derive(Debug)]
pub enum Admission {
    /// Enough space: the caller should start the item now
    ProcessNow(TransferItem),
    /// Not enough space: the item was parked in the backlog
    Queued,
}

impl Admission {
    /// Whether the item went to the backlog
    pub fn is_queued(&self) -> bool {
        matches!(self, Admission::Queued)
    }
}

/// Gate in front of the worker pool
pub struct AdmissionQueue {
    probe: Arc<dyn SpaceProbe>,
    storage_path: PathBuf,
    min_free: u64,
    pending: Mutex<VecDeque<TransferItem>>,
}

impl AdmissionQueue {
    /// Create a queue measuring `storage_path` through `probe`
    pub fn new(probe: Arc<dyn SpaceProbe>, storage_path: PathBuf, min_free: u64) -> Self {
        Self {
            probe,
            storage_path,
            min_free,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Whether `required_bytes` fit while keeping the free-space floor
    ///
    /// A failed measurement admits the work.
    pub fn has_space(&self, required_bytes: u64) -> bool {
        match self.probe.available_bytes(&self.storage_path) {
            Ok(free) => free > self.min_free.saturating_add(required_bytes),
            Err(e) => {
                tracing::warn!(
                    path = %self.storage_path.display(),
                    error = %e,
                    "Free space check failed, admitting work"
                );
                true
            }
        }
    }

    /// Admit the item now or park it until space frees up
    pub async fn enqueue(&self, item: TransferItem) -> Admission {
        if self.has_space(item.expected_size) {
            return Admission::ProcessNow(item);
        }

        tracing::info!(
            item = %item.id,
            name = %item.display_name,
            required = item.expected_size,
            "Not enough free space, item queued"
        );
        self.pending.lock().await.push_back(item);
        Admission::Queued
    }

    /// Remove and return the oldest parked item that now fits
    pub async fn dequeue(&self) -> Option<TransferItem> {
        let mut pending = self.pending.lock().await;
        let index = pending
            .iter()
            .position(|item| self.has_space(item.expected_size))?;
        pending.remove(index)
    }

    /// Number of parked items
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Snapshot of the parked items in FIFO order
    pub async fn pending(&self) -> Vec<TransferItem> {
        self.pending.lock().await.iter().cloned().collect()
    }

    /// Remove and return every parked item in FIFO order
    pub async fn take_pending(&self) -> Vec<TransferItem> {
        self.pending.lock().await.drain(..).collect()
    }
}
