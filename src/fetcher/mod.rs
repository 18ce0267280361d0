//! Retrieval of resolved content into local storage.
//!
//! A source locator is either a direct `http(s)://` URL or `sftp://` followed by an
//! absolute path on the seedbox. [`Fetcher::get`] dispatches on the scheme:
//! - [`http`]: streaming GET with retry and 10% progress steps
//! - [`remote`]: single file or recursive directory walk over SFTP, with `N/M files`
//!   progress, running on the blocking pool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{RetryConfig, SeedboxConfig};
use crate::error::TransferError;
use crate::{Error, Result};

pub mod http;
pub mod remote;

pub use http::HttpFetcher;
pub use remote::{RemoteEntry, RemoteFilesystem, RemoteSession, SftpFilesystem};

/// Parsed source locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    /// Direct download URL
    Http(url::Url),
    /// Absolute path on the remote filesystem
    Sftp(String),
}

impl SourceLocator {
    /// Parse a locator string
    ///
    /// # Examples
    ///
    /// ```
    /// use seedrelay::fetcher::SourceLocator;
    ///
    /// let loc = SourceLocator::parse("sftp:///home/me/files/Show").unwrap();
    /// assert_eq!(loc, SourceLocator::Sftp("/home/me/files/Show".to_string()));
    /// assert!(SourceLocator::parse("ftp://x/y").is_err());
    /// ```
    pub fn parse(locator: &str) -> Result<Self> {
        if let Some(path) = locator.strip_prefix("sftp://") {
            if !path.starts_with('/') {
                return Err(TransferError::UnsupportedLocator(format!(
                    "sftp locator must carry an absolute path: {}",
                    locator
                ))
                .into());
            }
            return Ok(SourceLocator::Sftp(path.to_string()));
        }

        let url = url::Url::parse(locator)
            .map_err(|e| TransferError::UnsupportedLocator(format!("{}: {}", locator, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(SourceLocator::Http(url)),
            other => Err(TransferError::UnsupportedLocator(format!(
                "unknown scheme '{}' in {}",
                other, locator
            ))
            .into()),
        }
    }
}

/// Fetch progress notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchProgress {
    /// Single stream, whole percent (reported in 10% steps)
    Percent(u8),
    /// Directory walk, files completed out of total
    Files {
        /// Files fetched so far
        done: usize,
        /// Files in the walk
        total: usize,
    },
}

/// Progress callback, invoked from async and blocking contexts alike
pub type ProgressFn = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// No-op progress callback
pub fn no_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Scheme-dispatching fetcher
#[derive(Clone)]
pub struct Fetcher {
    http: HttpFetcher,
    remote: Option<Arc<dyn RemoteFilesystem>>,
}

impl Fetcher {
    /// Build a fetcher; SFTP is available only when a seedbox is configured
    pub fn new(retry: RetryConfig, seedbox: Option<&SeedboxConfig>) -> Result<Self> {
        let remote = match seedbox {
            Some(config) => match SftpFilesystem::from_config(config) {
                Some(fs) => Some(Arc::new(fs) as Arc<dyn RemoteFilesystem>),
                None => {
                    tracing::info!("Seedbox SFTP host unknown, sftp locators disabled");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            http: HttpFetcher::new(retry)?,
            remote,
        })
    }

    /// Build a fetcher from explicit parts
    pub fn with_parts(http: HttpFetcher, remote: Option<Arc<dyn RemoteFilesystem>>) -> Self {
        Self { http, remote }
    }

    /// Retrieve `locator` into `destination`, returning the local root
    ///
    /// `destination` becomes a file for single-file sources and a directory for
    /// remote directories.
    pub async fn get(
        &self,
        locator: &str,
        destination: &Path,
        expected_size: u64,
        progress: ProgressFn,
    ) -> Result<PathBuf> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match SourceLocator::parse(locator)? {
            SourceLocator::Http(url) => {
                self.http
                    .fetch(url.as_str(), destination, expected_size, progress)
                    .await?;
            }
            SourceLocator::Sftp(path) => {
                let remote = self
                    .remote
                    .clone()
                    .ok_or_else(|| Error::NotConfigured("seedbox SFTP access".to_string()))?;
                let destination = destination.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    remote::fetch_tree(remote.as_ref(), &path, &destination, progress.as_ref())
                })
                .await
                .map_err(|e| Error::Other(format!("SFTP task panicked: {}", e)))??;
            }
        }

        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            return Err(TransferError::MissingContent {
                path: destination.to_path_buf(),
            }
            .into());
        }
        Ok(destination.to_path_buf())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_and_sftp_locators() {
        assert!(matches!(
            SourceLocator::parse("https://cdn.example/a.mkv").unwrap(),
            SourceLocator::Http(_)
        ));
        assert_eq!(
            SourceLocator::parse("sftp:///data/Show S01").unwrap(),
            SourceLocator::Sftp("/data/Show S01".to_string())
        );
    }

    #[test]
    fn rejects_relative_sftp_and_unknown_schemes() {
        for bad in ["sftp://relative/path", "ftp://host/file", "not a locator"] {
            let err = SourceLocator::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::Transfer(TransferError::UnsupportedLocator(_))),
                "{bad}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn sftp_without_seedbox_is_not_configured() {
        let fetcher = Fetcher::new(RetryConfig::default(), None).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let err = fetcher
            .get("sftp:///x", &dir.path().join("x"), 0, no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }
}
