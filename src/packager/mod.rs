//! Content hashing, upload dedup and repackaging of fetched content.
//!
//! A fetched root is first turned into a list of deliverable files by [`Packager::collect`]:
//! picture folders are zipped (or skipped when too large for the messaging sink) and
//! everything else is walked. Each file then goes through [`Packager::prepare`]:
//! - whole-file SHA-256
//! - skip and delete when the upload ledger already holds `(hash, sink)`
//! - split when larger than the sink's single-object limit, into parts of at most
//!   `min(chunk_size, limit - safety_margin)` bytes
//!
//! The ledger is only written by [`Packager::record_delivery`], after every part of a
//! file reached the sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::PackagingConfig;
use crate::state::StateStore;
use crate::types::SinkKind;
use crate::utils::dir_size;
use crate::{Error, Result};

pub mod archive;
pub mod split;

pub use archive::{should_zip, zip_folder};
pub use split::{MediaTools, Splitter, plan_parts};

/// Read buffer for hashing
const HASH_BUFFER: usize = 1024 * 1024;

/// Whole-file SHA-256, hex encoded, computed on the blocking pool
pub async fn content_hash(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        use std::io::Read;

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Other(format!("hash task panicked: {}", e)))?
}

/// Something under the fetched root that will not be delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedEntry {
    /// File or folder
    pub path: PathBuf,
    /// Why
    pub reason: String,
}

/// Deliverable files found under a fetched root
#[derive(Clone, Debug, Default)]
pub struct Collected {
    /// Files to prepare and deliver, in order
    pub files: Vec<PathBuf>,
    /// Entries left out
    pub skipped: Vec<SkippedEntry>,
}

/// A file ready for delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackagedFile {
    /// File as found under the fetched root
    pub original: PathBuf,
    /// SHA-256 of the original bytes
    pub content_hash: String,
    /// Size of the original file
    pub size: u64,
    /// Parts to deliver in order (just `original` when not split)
    pub parts: Vec<PathBuf>,
}

impl PackagedFile {
    /// Name of the original file
    pub fn file_name(&self) -> String {
        self.original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of preparing one file
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackageOutcome {
    /// Deliver these parts
    Ready(PackagedFile),
    /// Already delivered to this sink; the local file was removed
    Duplicate {
        /// The removed file
        file: PathBuf,
        /// Its content hash
        content_hash: String,
    },
}

/// Hashes, deduplicates and splits files for a sink
#[derive(Clone)]
pub struct Packager {
    state: Arc<dyn StateStore>,
    config: PackagingConfig,
    splitter: Splitter,
}

impl Packager {
    /// Create a packager
    pub fn new(state: Arc<dyn StateStore>, config: PackagingConfig, tools: MediaTools) -> Self {
        let splitter = Splitter::new(config.chunk_size, tools).with_safety_margin(config.safety_margin);
        Self {
            state,
            config,
            splitter,
        }
    }

    /// Media tools shared with the preview step
    pub fn media_tools(&self) -> &MediaTools {
        self.splitter.tools()
    }

    /// List deliverable files under `root`
    ///
    /// Keyword folders are zipped in place and replaced by their archive; for the
    /// messaging sink a keyword folder above `max_zip_size` is skipped instead.
    pub async fn collect(&self, root: &Path, sink: SinkKind) -> Result<Collected> {
        let mut collected = Collected::default();
        if tokio::fs::metadata(root).await?.is_file() {
            collected.files.push(root.to_path_buf());
            return Ok(collected);
        }

        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_file() {
                    collected.files.push(path);
                    continue;
                }
                if !file_type.is_dir() {
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                if !should_zip(&name, &self.config.zip_keywords) {
                    pending.push(path);
                    continue;
                }

                let size = dir_size(&path).await?;
                if sink == SinkKind::Messaging && size > self.config.max_zip_size {
                    tracing::info!(folder = ?path, size, "Folder too large to zip for messaging, skipping");
                    collected.skipped.push(SkippedEntry {
                        path,
                        reason: format!("folder too large for messaging ({} bytes)", size),
                    });
                    continue;
                }

                let folder = path.clone();
                let zip_path = tokio::task::spawn_blocking(move || zip_folder(&folder))
                    .await
                    .map_err(|e| Error::Other(format!("zip task panicked: {}", e)))??;
                tokio::fs::remove_dir_all(&path).await?;
                collected.files.push(zip_path);
            }
        }

        // an archive created mid-walk may also be listed by read_dir
        collected.files.sort();
        collected.files.dedup();
        Ok(collected)
    }

    /// Hash, dedup and split one file
    ///
    /// `max_object_size` is the sink's single-object limit (`None` = unlimited).
    pub async fn prepare(
        &self,
        file: &Path,
        sink: SinkKind,
        max_object_size: Option<u64>,
    ) -> Result<PackageOutcome> {
        let hash = content_hash(file).await?;

        if self.state.is_uploaded(&hash, sink).await? {
            tracing::info!(file = ?file, hash = %hash, sink = %sink, "Already delivered, skipping");
            tokio::fs::remove_file(file).await?;
            return Ok(PackageOutcome::Duplicate {
                file: file.to_path_buf(),
                content_hash: hash,
            });
        }

        let size = tokio::fs::metadata(file).await?.len();
        let parts = match max_object_size {
            Some(limit) if size > limit => {
                let parts = self.splitter.split(file, max_object_size).await?;
                tokio::fs::remove_file(file).await?;
                parts
            }
            _ => vec![file.to_path_buf()],
        };

        Ok(PackageOutcome::Ready(PackagedFile {
            original: file.to_path_buf(),
            content_hash: hash,
            size,
            parts,
        }))
    }

    /// Record that every part of `packaged` reached `sink`
    pub async fn record_delivery(&self, packaged: &PackagedFile, sink: SinkKind) -> Result<()> {
        let metadata = serde_json::json!({
            "file_name": packaged.file_name(),
            "size": packaged.size,
            "parts": packaged.parts.len(),
        });
        self.state
            .mark_uploaded(&packaged.content_hash, sink, &metadata)
            .await
    }
}
