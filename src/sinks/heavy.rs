//! Serialized heavy-path uploads.
//!
//! The large-file session is not safe for concurrent use. It is owned by one actor
//! running on a dedicated thread with its own single-threaded runtime; callers hold a
//! cloneable [`HeavyUploadHandle`], send requests over an `mpsc` channel and await a
//! `oneshot` reply. Exactly one heavy upload is in flight at any time.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::{Error, Result};

/// Requests waiting for the actor beyond this block the sender
const QUEUE_DEPTH: usize = 16;

/// One file to upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    /// Local file
    pub path: PathBuf,
    /// Chat the file goes to
    pub target: String,
    /// Caption shown with the file
    pub caption: String,
    /// Optional preview image
    pub thumbnail: Option<PathBuf>,
}

/// Long-lived upload session for large files
#[async_trait]
pub trait HeavySession: Send {
    /// Upload one file
    async fn upload(&mut self, request: &UploadRequest) -> Result<()>;
}

struct HeavyJob {
    request: UploadRequest,
    reply: oneshot::Sender<Result<()>>,
}

/// Handle to the heavy-path actor
#[derive(Clone, Debug)]
pub struct HeavyUploadHandle {
    tx: mpsc::Sender<HeavyJob>,
}

impl std::fmt::Debug for HeavyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeavyJob")
            .field("request", &self.request)
            .finish()
    }
}

impl HeavyUploadHandle {
    /// Move `session` onto its own thread and return a handle to it
    ///
    /// `pause` is slept after each upload. The thread exits once every handle is dropped.
    pub fn spawn(mut session: Box<dyn HeavySession>, pause: Duration) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<HeavyJob>(QUEUE_DEPTH);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("seedrelay-heavy-upload".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        tracing::info!(file = ?job.request.path, target = %job.request.target, "Heavy upload starting");
                        let result = session.upload(&job.request).await;
                        if let Err(e) = &result {
                            tracing::warn!(file = ?job.request.path, error = %e, "Heavy upload failed");
                        }
                        // the submitter may have given up waiting
                        let _ = job.reply.send(result);
                        if !pause.is_zero() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                    tracing::debug!("Heavy upload actor stopped");
                });
            })?;

        Ok(Self { tx })
    }

    /// Queue `request` and wait for the actor to finish it
    pub async fn upload(&self, request: UploadRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HeavyJob { request, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

fn stopped() -> Error {
    Error::Sink {
        sink: "messaging".to_string(),
        message: "heavy upload session stopped".to_string(),
    }
}
