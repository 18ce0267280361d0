//! Streaming HTTP(S) fetch with retry.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::{FetchProgress, ProgressFn};
use crate::config::RetryConfig;
use crate::retry::fetch_with_retry;
use crate::{Error, Result};

/// Connect timeout; the body itself may stream for as long as it needs
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tracks which 10% step was last reported
struct ProgressSteps {
    total: u64,
    last_step: u8,
}

impl ProgressSteps {
    fn new(total: u64) -> Self {
        Self {
            total,
            last_step: 0,
        }
    }

    /// Percentage to report for `written` bytes, if a new step was reached
    fn advance(&mut self, written: u64) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let percent = (written.saturating_mul(100) / self.total).min(100) as u8;
        let step = percent / 10;
        if step > self.last_step {
            self.last_step = step;
            Some(step * 10)
        } else {
            None
        }
    }
}

/// HTTP(S) downloader
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    /// Create a fetcher with its own client
    pub fn new(retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent("seedrelay")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, retry })
    }

    /// Download `url` to `destination`
    ///
    /// Each attempt truncates the destination and starts over. 5xx, 429, connection
    /// and timeout failures are retried with backoff; other statuses fail at once.
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        expected_size: u64,
        progress: ProgressFn,
    ) -> Result<u64> {
        fetch_with_retry(&self.retry, || {
            self.attempt(url, destination, expected_size, progress.clone())
        })
        .await
    }

    async fn attempt(
        &self,
        url: &str,
        destination: &Path,
        expected_size: u64,
        progress: ProgressFn,
    ) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length().unwrap_or(expected_size);
        let mut steps = ProgressSteps::new(total);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(destination)
            .await?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::warn!(
                    url = %url,
                    bytes_so_far = written,
                    error = %e,
                    "Body stream interrupted"
                );
                Error::Network(e)
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(percent) = steps.advance(written) {
                progress(FetchProgress::Percent(percent));
            }
        }
        file.flush().await?;

        tracing::debug!(url = %url, bytes = written, "HTTP fetch complete");
        Ok(written)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<FetchProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |p| sink.lock().unwrap().push(p)), seen)
    }

    #[test]
    fn progress_reports_each_ten_percent_once() {
        let mut steps = ProgressSteps::new(1000);
        let reported: Vec<u8> = (1..=1000u64)
            .step_by(7)
            .chain(std::iter::once(1000))
            .filter_map(|w| steps.advance(w))
            .collect();
        assert_eq!(reported, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn unknown_total_reports_nothing() {
        let mut steps = ProgressSteps::new(0);
        assert_eq!(steps.advance(500), None);
    }

    #[tokio::test]
    async fn downloads_body_and_reports_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 10_000];
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let (progress, seen) = recorder();

        let fetcher = HttpFetcher::new(fast_retry()).unwrap();
        let written = fetcher
            .fetch(&format!("{}/file.bin", server.uri()), &dest, 0, progress)
            .await
            .unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert_eq!(
            seen.lock().unwrap().last(),
            Some(&FetchProgress::Percent(100))
        );
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("f");
        let fetcher = HttpFetcher::new(fast_retry()).unwrap();
        fetcher
            .fetch(&server.uri(), &dest, 0, super::super::no_progress())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(fast_retry()).unwrap();
        let err = fetcher
            .fetch(&server.uri(), &dir.path().join("f"), 0, super::super::no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(5)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(fast_retry()).unwrap();
        let err = fetcher
            .fetch(&server.uri(), &dir.path().join("f"), 0, super::super::no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
    }
}
