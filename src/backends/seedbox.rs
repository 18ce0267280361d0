//! Seedbox client for ruTorrent's `httprpc` plugin.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use super::{AcquisitionBackend, AddSource, RemoteItem, RemoteStatus, extract_btih};
use crate::backends::check_backend_response;
use crate::config::SeedboxConfig;
use crate::types::BackendKind;
use crate::utils::sanitize_secret;
use crate::{Error, Result};

// Column positions in an httprpc `mode=list` row
const F_IS_OPEN: usize = 0;
const F_STATE: usize = 3;
const F_NAME: usize = 4;
const F_SIZE: usize = 5;
const F_BYTES_DONE: usize = 8;
const F_HASHING: usize = 23;
const F_BASE_PATH: usize = 25;

const ADD_SETTLE_ATTEMPTS: usize = 5;
const ADD_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Decide whether a seedbox item is finished
///
/// A reported state is authoritative: the item is complete iff it is `seeding`.
/// Only when no state is reported does byte equality decide.
pub fn seedbox_complete(state: Option<&str>, size: u64, bytes_done: u64) -> bool {
    match state {
        Some(state) => state.eq_ignore_ascii_case("seeding"),
        None => size > 0 && bytes_done == size,
    }
}

fn field<'a>(row: &'a [serde_json::Value], index: usize) -> Option<&'a str> {
    row.get(index).and_then(|v| v.as_str())
}

fn numeric(row: &[serde_json::Value], index: usize) -> u64 {
    field(row, index)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

fn derive_state(row: &[serde_json::Value], size: u64, bytes_done: u64) -> &'static str {
    let flag = |index| field(row, index).is_some_and(|v| v != "0" && !v.is_empty());

    if flag(F_HASHING) {
        "hashing"
    } else if size > 0 && bytes_done >= size {
        "seeding"
    } else if flag(F_IS_OPEN) && flag(F_STATE) {
        "downloading"
    } else {
        "paused"
    }
}

/// Parse the `t` object of an httprpc listing into items
fn parse_listing(body: &serde_json::Value) -> Vec<RemoteItem> {
    let Some(torrents) = body.get("t").and_then(|t| t.as_object()) else {
        return Vec::new();
    };

    let mut items: Vec<RemoteItem> = torrents
        .iter()
        .filter_map(|(hash, row)| {
            let row = row.as_array()?;
            let size = numeric(row, F_SIZE);
            let bytes_done = numeric(row, F_BYTES_DONE);
            let state = derive_state(row, size, bytes_done);
            let complete = seedbox_complete(Some(state), size, bytes_done);

            Some(RemoteItem {
                external_id: hash.clone(),
                name: field(row, F_NAME).unwrap_or(hash.as_str()).to_string(),
                status: if complete {
                    RemoteStatus::Ready
                } else {
                    RemoteStatus::Downloading
                },
                size,
                bytes_done,
                base_path: field(row, F_BASE_PATH)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
                state: Some(state.to_string()),
            })
        })
        .collect();

    items.sort_by(|a, b| a.name.cmp(&b.name));
    items
}

/// ruTorrent seedbox client (HTTP basic auth)
pub struct SeedboxClient {
    http: reqwest::Client,
    rpc_url: String,
    username: String,
    password: String,
}

impl SeedboxClient {
    /// Build a client from configuration
    pub fn new(config: &SeedboxConfig) -> Result<Self> {
        let username = sanitize_secret(&config.username);
        let password = sanitize_secret(&config.password);
        if config.rpc_url.trim().is_empty() || username.is_empty() || password.is_empty() {
            return Err(Error::NotConfigured(
                "seedbox rpc_url, username and password".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("seedrelay")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rpc_url: config.rpc_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    async fn action(&self, params: &[(&str, &str)]) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/plugins/httprpc/action.php", self.rpc_url))
            .basic_auth(&self.username, Some(&self.password))
            .form(params)
            .send()
            .await?;
        check_backend_response(BackendKind::Seedbox, response).await
    }

    async fn hashes(&self) -> Result<HashSet<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|item| item.external_id)
            .collect())
    }

    /// Wait for a torrent added without a known hash to show up in the listing
    async fn find_new_hash(&self, before: &HashSet<String>) -> Result<String> {
        for _ in 0..ADD_SETTLE_ATTEMPTS {
            tokio::time::sleep(ADD_SETTLE_DELAY).await;
            if let Some(hash) = self
                .hashes()
                .await?
                .into_iter()
                .find(|h| !before.contains(h))
            {
                return Ok(hash);
            }
        }
        Err(Error::BackendApi {
            backend: BackendKind::Seedbox.name().to_string(),
            message: "added torrent did not appear in the listing".to_string(),
        })
    }
}

#[async_trait]
impl AcquisitionBackend for SeedboxClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Seedbox
    }

    async fn list(&self) -> Result<Vec<RemoteItem>> {
        let response = self.action(&[("mode", "list")]).await?;
        let body: serde_json::Value = response.json().await.map_err(|e| Error::BackendApi {
            backend: BackendKind::Seedbox.name().to_string(),
            message: format!("unexpected listing: {}", e),
        })?;
        Ok(parse_listing(&body))
    }

    async fn add(&self, source: AddSource) -> Result<String> {
        let known_hash = match &source {
            AddSource::Magnet(magnet) => extract_btih(magnet).map(|h| h.to_ascii_uppercase()),
            _ => None,
        };
        let before = if known_hash.is_none() {
            self.hashes().await?
        } else {
            HashSet::new()
        };

        let endpoint = format!("{}/php/addtorrent.php", self.rpc_url);
        let request = match source {
            AddSource::Magnet(link) | AddSource::TorrentUrl(link) => {
                tracing::info!(link = %link.chars().take(50).collect::<String>(), "Adding torrent to seedbox");
                self.http.post(&endpoint).form(&[("url", link)])
            }
            AddSource::TorrentFile(data) => {
                tracing::info!(bytes = data.len(), "Uploading torrent file to seedbox");
                let part = reqwest::multipart::Part::bytes(data)
                    .file_name("file.torrent")
                    .mime_str("application/x-bittorrent")?;
                self.http
                    .post(&endpoint)
                    .multipart(reqwest::multipart::Form::new().part("torrent_file", part))
            }
        };

        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        check_backend_response(BackendKind::Seedbox, response).await?;

        match known_hash {
            Some(hash) => Ok(hash),
            None => self.find_new_hash(&before).await,
        }
    }

    async fn delete(&self, external_id: &str) -> Result<()> {
        tracing::info!(hash = external_id, "Removing torrent from seedbox");
        self.action(&[("mode", "remove"), ("hash", external_id)])
            .await?;
        Ok(())
    }

    async fn stop(&self, external_id: &str) -> Result<()> {
        self.action(&[("mode", "stop"), ("hash", external_id)])
            .await?;
        Ok(())
    }

    async fn start(&self, external_id: &str) -> Result<()> {
        self.action(&[("mode", "start"), ("hash", external_id)])
            .await?;
        Ok(())
    }
}
