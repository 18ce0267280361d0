//! Acquisition backends.
//!
//! A backend is a remote service that turns a magnet link or torrent into files we can
//! fetch. Two exist:
//! - [`DebridClient`]: a caching resolver that hands back direct HTTP links, and can
//!   tell whether content is already cached
//! - [`SeedboxClient`]: a ruTorrent seedbox whose finished content is pulled over SFTP
//!
//! Both are driven through [`AcquisitionBackend`]. Operations that only make sense for
//! one of them return [`Error::NotSupported`] on the other.

use async_trait::async_trait;

use crate::types::BackendKind;
use crate::{Error, Result};

mod debrid;
mod seedbox;

pub use debrid::{DebridClient, extract_btih};
pub use seedbox::{SeedboxClient, seedbox_complete};

/// Coarse state of an item held by a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteStatus {
    /// The backend waits for us to pick which files to fetch
    WaitingSelection,
    /// Still acquiring
    Downloading,
    /// Content is complete and can be transferred
    Ready,
    /// The backend gave up on the item
    Failed,
    /// Any status we do not act on, kept verbatim
    Other(String),
}

/// An item as reported by a backend listing
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteItem {
    /// Backend-specific id (debrid torrent id, seedbox info hash)
    pub external_id: String,
    /// Display name
    pub name: String,
    /// Interpreted status
    pub status: RemoteStatus,
    /// Total size in bytes (0 when unknown)
    pub size: u64,
    /// Bytes acquired so far
    pub bytes_done: u64,
    /// Absolute path of the content on the seedbox
    pub base_path: Option<String>,
    /// Raw state string as the backend reported it
    pub state: Option<String>,
}

/// A backend link resolved to something directly downloadable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLink {
    /// Direct HTTP(S) URL
    pub download_url: String,
    /// File name reported by the backend
    pub filename: String,
    /// Size in bytes (0 when unknown)
    pub filesize: u64,
}

/// What to hand a backend when adding content
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddSource {
    /// `magnet:` URI
    Magnet(String),
    /// Raw `.torrent` file contents
    TorrentFile(Vec<u8>),
    /// URL of a `.torrent` file the backend fetches itself
    TorrentUrl(String),
}

impl AddSource {
    /// Classify a feed or user supplied link
    pub fn from_link(link: &str) -> Self {
        if link.starts_with("magnet:") {
            AddSource::Magnet(link.to_string())
        } else {
            AddSource::TorrentUrl(link.to_string())
        }
    }
}

/// Contract the monitor, router and feed manager consume
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Items currently held by the backend
    async fn list(&self) -> Result<Vec<RemoteItem>>;

    /// Add content, returning the backend's external id for it
    async fn add(&self, source: AddSource) -> Result<String>;

    /// Remove an item from the backend
    async fn delete(&self, external_id: &str) -> Result<()>;

    /// Select every file of an item waiting for selection
    async fn select_files(&self, external_id: &str) -> Result<()> {
        let _ = external_id;
        Err(unsupported(self.kind(), "select_files"))
    }

    /// Links the backend holds for a finished item
    async fn get_links(&self, external_id: &str) -> Result<Vec<String>> {
        let _ = external_id;
        Err(unsupported(self.kind(), "get_links"))
    }

    /// Turn a backend link into a direct download
    async fn resolve(&self, link: &str) -> Result<ResolvedLink> {
        let _ = link;
        Err(unsupported(self.kind(), "resolve"))
    }

    /// Whether the content behind a magnet link is already cached
    async fn is_cached(&self, link: &str) -> Result<bool> {
        let _ = link;
        Err(unsupported(self.kind(), "is_cached"))
    }

    /// Pause an item
    async fn stop(&self, external_id: &str) -> Result<()> {
        let _ = external_id;
        Err(unsupported(self.kind(), "stop"))
    }

    /// Resume an item
    async fn start(&self, external_id: &str) -> Result<()> {
        let _ = external_id;
        Err(unsupported(self.kind(), "start"))
    }
}

fn unsupported(kind: BackendKind, operation: &str) -> Error {
    Error::NotSupported(format!("{} does not support {}", kind, operation))
}

/// Map a non-success backend response to an error
///
/// 401 is an authentication failure; anything else is an API error carrying the body.
pub(crate) async fn check_backend_response(
    backend: BackendKind,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        tracing::error!(backend = %backend, "Backend rejected credentials");
        return Err(Error::BackendAuth {
            backend: backend.name().to_string(),
        });
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    if crate::retry::is_retryable_status(status.as_u16()) {
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            url,
        });
    }

    Err(Error::BackendApi {
        backend: backend.name().to_string(),
        message: format!(
            "HTTP {}: {}",
            status.as_u16(),
            crate::error::truncate_diagnostics(&body)
        ),
    })
}
