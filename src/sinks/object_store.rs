//! Object-storage sink driven by an external sync tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::Sink;
use crate::config::{ObjectStoreConfig, ToolsConfig};
use crate::error::truncate_diagnostics;
use crate::types::SinkKind;
use crate::{Error, Result};

/// Copies files to a remote with `rclone copy <path> <destination>`
///
/// A nonzero exit or anything written to stderr fails the delivery. There is no retry
/// here; the item fails and the ledger stays untouched.
#[derive(Clone, Debug)]
pub struct ObjectStoreSink {
    rclone: PathBuf,
    destination: String,
}

impl ObjectStoreSink {
    /// Sink using an explicit binary
    pub fn new(rclone: PathBuf, destination: impl Into<String>) -> Self {
        Self {
            rclone,
            destination: destination.into(),
        }
    }

    /// Sink from configuration; the tool is looked up on PATH when not configured
    pub fn from_config(config: &ObjectStoreConfig, tools: &ToolsConfig) -> Self {
        let rclone = tools
            .resolve_binary(tools.rclone_path.as_ref(), "rclone")
            .unwrap_or_else(|| {
                tracing::warn!("rclone not found, object storage deliveries will fail");
                PathBuf::from("rclone")
            });
        Self::new(rclone, config.destination.clone())
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ObjectStorage
    }

    fn max_object_size(&self) -> Option<u64> {
        None
    }

    async fn deliver(&self, file: &Path, _owner_ref: Option<&str>) -> Result<()> {
        tracing::info!(file = ?file, destination = %self.destination, "Copying to object storage");
        let output = Command::new(&self.rclone)
            .arg("copy")
            .arg(file)
            .arg(&self.destination)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute rclone: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(Error::ExternalTool(format!(
                "rclone copy exited with {:?}: {}",
                output.status.code(),
                truncate_diagnostics(&stderr)
            )));
        }
        Ok(())
    }
}
