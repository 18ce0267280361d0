//! External downloader jobs.
//!
//! [`JobRunner`] runs a downloader tool (default `yt-dlp`) for a URL on a small
//! bounded pool. Each run is limited to a maximum runtime; a run that exceeds it is
//! killed. Every status change is written to the state store, so `job_status` works
//! from any process sharing it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::{Semaphore, broadcast};

use crate::config::ToolsConfig;
use crate::error::truncate_diagnostics;
use crate::state::StateStore;
use crate::types::{Event, JobRecord, JobStatus};
use crate::Result;

/// Default downloader program
pub const DEFAULT_DOWNLOADER: &str = "yt-dlp";

/// Runs downloader jobs with a runtime limit
#[derive(Clone)]
pub struct JobRunner {
    state: Arc<dyn StateStore>,
    program: PathBuf,
    max_runtime: Duration,
    workers: Arc<Semaphore>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl JobRunner {
    /// Runner using the configured downloader, looked up on PATH when not set
    pub fn new(state: Arc<dyn StateStore>, tools: &ToolsConfig) -> Self {
        let program = tools
            .resolve_binary(tools.downloader_path.as_ref(), DEFAULT_DOWNLOADER)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADER));
        Self::with_program(state, program, tools.job_max_runtime, tools.job_workers)
    }

    /// Runner for an explicit program
    pub fn with_program(
        state: Arc<dyn StateStore>,
        program: PathBuf,
        max_runtime: Duration,
        workers: usize,
    ) -> Self {
        Self {
            state,
            program,
            max_runtime,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            event_tx: None,
        }
    }

    /// Emit [`Event::JobUpdated`] on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Record a queued job and start it in the background, returning its id
    ///
    /// With `out_dir` the tool writes `<out_dir>/%(title)s.%(ext)s`.
    pub async fn enqueue(&self, url: &str, out_dir: Option<&Path>) -> Result<String> {
        let job_id = format!("{:032x}", rand::random::<u128>());
        let now = Utc::now();
        let record = JobRecord {
            status: JobStatus::Queued,
            url: url.to_string(),
            dest: out_dir.map(|d| d.display().to_string()).unwrap_or_default(),
            created_at: now,
            updated_at: now,
            returncode: None,
            stdout: None,
            stderr: None,
        };
        self.update(&job_id, &record).await?;
        tracing::info!(job = %job_id, url = %url, "Job queued");

        let runner = self.clone();
        let id = job_id.clone();
        let out_dir = out_dir.map(Path::to_path_buf);
        tokio::spawn(async move {
            runner.run(&id, record, out_dir).await;
        });

        Ok(job_id)
    }

    /// Current record of a job, `None` when unknown or expired
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.state.get_job(job_id).await
    }

    async fn run(&self, job_id: &str, mut record: JobRecord, out_dir: Option<PathBuf>) {
        let Ok(_permit) = self.workers.acquire().await else {
            return;
        };

        record.status = JobStatus::Running;
        record.updated_at = Utc::now();
        if let Err(e) = self.update(job_id, &record).await {
            tracing::warn!(job = %job_id, error = %e, "Failed to record job start");
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(&record.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &out_dir {
            cmd.arg("-o").arg(dir.join("%(title)s.%(ext)s"));
        }

        match cmd.spawn() {
            Err(e) => {
                record.status = JobStatus::Error;
                record.stderr = Some(format!("Failed to execute {}: {}", self.program.display(), e));
            }
            Ok(child) => match tokio::time::timeout(self.max_runtime, child.wait_with_output()).await {
                // dropping the future kills the child
                Err(_) => {
                    record.status = JobStatus::Timeout;
                    record.stderr = Some(format!(
                        "exceeded maximum runtime of {}s",
                        self.max_runtime.as_secs()
                    ));
                }
                Ok(Err(e)) => {
                    record.status = JobStatus::Error;
                    record.stderr = Some(e.to_string());
                }
                Ok(Ok(output)) => {
                    record.status = if output.status.success() {
                        JobStatus::Done
                    } else {
                        JobStatus::Failed
                    };
                    record.returncode = output.status.code();
                    record.stdout =
                        Some(truncate_diagnostics(&String::from_utf8_lossy(&output.stdout)));
                    record.stderr =
                        Some(truncate_diagnostics(&String::from_utf8_lossy(&output.stderr)));
                }
            },
        }

        record.updated_at = Utc::now();
        tracing::info!(job = %job_id, status = ?record.status, code = ?record.returncode, "Job finished");
        if let Err(e) = self.update(job_id, &record).await {
            tracing::error!(job = %job_id, error = %e, "Failed to record job result");
        }
    }

    async fn update(&self, job_id: &str, record: &JobRecord) -> Result<()> {
        self.state.set_job(job_id, record).await?;
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(Event::JobUpdated {
                job_id: job_id.to_string(),
                status: record.status,
            });
        }
        Ok(())
    }
}
