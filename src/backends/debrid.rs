//! Caching resolver client (Real-Debrid REST API).

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{AcquisitionBackend, AddSource, RemoteItem, RemoteStatus, ResolvedLink};
use crate::backends::check_backend_response;
use crate::config::DebridConfig;
use crate::types::BackendKind;
use crate::utils::sanitize_secret;
use crate::{Error, Result};

const DEFAULT_LIST_LIMIT: usize = 20;

static BTIH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"btih:([a-fA-F0-9]{40})").ok());

/// Extract the lowercase 40-hex info hash from a magnet link
///
/// Base32 info hashes and `.torrent` URLs yield `None`.
pub fn extract_btih(link: &str) -> Option<String> {
    BTIH.as_ref()?
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

#[derive(Debug, Deserialize)]
struct TorrentEntry {
    id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    progress: f64,
}

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
    filename: String,
    #[serde(default)]
    filesize: u64,
}

fn interpret_status(status: &str) -> RemoteStatus {
    match status {
        "waiting_files_selection" => RemoteStatus::WaitingSelection,
        "downloaded" => RemoteStatus::Ready,
        "magnet_conversion" | "queued" | "downloading" | "compressing" | "uploading" => {
            RemoteStatus::Downloading
        }
        "error" | "magnet_error" | "virus" | "dead" => RemoteStatus::Failed,
        other => RemoteStatus::Other(other.to_string()),
    }
}

/// Real-Debrid style client
///
/// Every request carries the sanitized API token as a bearer credential.
pub struct DebridClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    list_limit: usize,
}

impl DebridClient {
    /// Build a client from configuration
    ///
    /// Fails with [`Error::NotConfigured`] when the token is empty after sanitizing.
    pub fn new(config: &DebridConfig) -> Result<Self> {
        let token = sanitize_secret(&config.api_token);
        if token.is_empty() {
            return Err(Error::NotConfigured("debrid api_token".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("seedrelay")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(base_url = %config.base_url, "Initialized debrid client");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            list_limit: DEFAULT_LIST_LIMIT,
        })
    }

    /// Set how many torrents a listing asks for
    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.bearer_auth(&self.token).send().await?;
        check_backend_response(BackendKind::CacheResolver, response).await
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::BackendApi {
            backend: BackendKind::CacheResolver.name().to_string(),
            message: format!("unexpected response: {}", e),
        })
    }

    async fn add_torrent_bytes(&self, data: Vec<u8>) -> Result<String> {
        let response = self
            .send(self.http.put(self.url("/torrents/addTorrent")).body(data))
            .await?;
        let added: AddResponse = Self::json(response).await?;
        Ok(added.id)
    }
}

#[async_trait]
impl AcquisitionBackend for DebridClient {
    fn kind(&self) -> BackendKind {
        BackendKind::CacheResolver
    }

    async fn list(&self) -> Result<Vec<RemoteItem>> {
        let response = self
            .send(
                self.http
                    .get(self.url("/torrents"))
                    .query(&[("limit", self.list_limit)]),
            )
            .await?;

        // an empty account answers 204 with no body
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let entries: Vec<TorrentEntry> = Self::json(response).await?;

        Ok(entries
            .into_iter()
            .map(|t| {
                let done = ((t.bytes as f64) * t.progress.clamp(0.0, 100.0) / 100.0) as u64;
                RemoteItem {
                    status: interpret_status(&t.status),
                    state: Some(t.status),
                    external_id: t.id,
                    name: t.filename,
                    size: t.bytes,
                    bytes_done: done,
                    base_path: None,
                }
            })
            .collect())
    }

    async fn add(&self, source: AddSource) -> Result<String> {
        match source {
            AddSource::Magnet(magnet) => {
                tracing::info!(magnet = %magnet.chars().take(50).collect::<String>(), "Adding magnet to debrid");
                let response = self
                    .send(
                        self.http
                            .post(self.url("/torrents/addMagnet"))
                            .form(&[("magnet", magnet.as_str())]),
                    )
                    .await?;
                let added: AddResponse = Self::json(response).await?;
                Ok(added.id)
            }
            AddSource::TorrentFile(data) => {
                tracing::info!(bytes = data.len(), "Adding torrent file to debrid");
                self.add_torrent_bytes(data).await
            }
            AddSource::TorrentUrl(url) => {
                tracing::info!(url = %url, "Fetching torrent file for debrid");
                let response = self.http.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(Error::HttpStatus {
                        status: response.status().as_u16(),
                        url,
                    });
                }
                let data = response.bytes().await?.to_vec();
                self.add_torrent_bytes(data).await
            }
        }
    }

    async fn delete(&self, external_id: &str) -> Result<()> {
        tracing::info!(id = external_id, "Deleting debrid torrent");
        self.send(
            self.http
                .delete(self.url(&format!("/torrents/delete/{}", external_id))),
        )
        .await?;
        Ok(())
    }

    async fn select_files(&self, external_id: &str) -> Result<()> {
        tracing::info!(id = external_id, "Selecting all files");
        self.send(
            self.http
                .post(self.url(&format!("/torrents/selectFiles/{}", external_id)))
                .form(&[("files", "all")]),
        )
        .await?;
        Ok(())
    }

    async fn get_links(&self, external_id: &str) -> Result<Vec<String>> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/torrents/info/{}", external_id))),
            )
            .await?;
        let info: TorrentInfo = Self::json(response).await?;
        Ok(info.links)
    }

    async fn resolve(&self, link: &str) -> Result<ResolvedLink> {
        let response = self
            .send(
                self.http
                    .post(self.url("/unrestrict/link"))
                    .form(&[("link", link), ("remote", "1")]),
            )
            .await?;
        let unrestricted: UnrestrictResponse = Self::json(response).await?;
        Ok(ResolvedLink {
            download_url: unrestricted.download,
            filename: unrestricted.filename,
            filesize: unrestricted.filesize,
        })
    }

    async fn is_cached(&self, link: &str) -> Result<bool> {
        let hash = extract_btih(link).ok_or_else(|| {
            Error::NotSupported(format!("no 40-hex info hash in {}", link))
        })?;

        tracing::debug!(hash = %hash, "Checking debrid cache");
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/torrents/instantAvailability/{}", hash))),
            )
            .await?;
        let availability: serde_json::Value = Self::json(response).await?;

        let cached = match availability.get(&hash) {
            Some(serde_json::Value::Object(variants)) => !variants.is_empty(),
            Some(serde_json::Value::Array(variants)) => !variants.is_empty(),
            _ => false,
        };
        Ok(cached)
    }
}
