//! Messaging sink over the Bot API.
//!
//! Files below the direct threshold go straight to `sendDocument`. Larger files are
//! handed to the heavy-path actor, whose session talks to a large-file capable
//! endpoint. Videos get a preview frame, removed once the delivery finished.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;

use super::Sink;
use super::heavy::{HeavySession, HeavyUploadHandle, UploadRequest};
use super::preview::generate_preview;
use crate::config::MessagingConfig;
use crate::packager::MediaTools;
use crate::types::SinkKind;
use crate::utils::{PREVIEW_EXTENSIONS, has_extension, sanitize_secret};
use crate::{Error, Result};

/// Pause between heavy uploads
const HEAVY_PAUSE: Duration = Duration::from_secs(1);

fn sink_error(message: impl Into<String>) -> Error {
    Error::Sink {
        sink: SinkKind::Messaging.to_string(),
        message: message.into(),
    }
}

fn send_document_url(api_base: &str, token: &str) -> String {
    format!("{}/bot{}/sendDocument", api_base.trim_end_matches('/'), token)
}

async fn file_part(path: &Path) -> Result<Part> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(
        Part::stream_with_length(reqwest::Body::wrap_stream(ReaderStream::new(file)), len)
            .file_name(name),
    )
}

/// POST one `sendDocument` multipart request
async fn send_document(client: &reqwest::Client, url: &str, request: &UploadRequest) -> Result<()> {
    let mut form = Form::new()
        .text("chat_id", request.target.clone())
        .text("caption", request.caption.clone())
        .part("document", file_part(&request.path).await?);
    if let Some(thumb) = &request.thumbnail {
        form = form.part("thumbnail", file_part(thumb).await?);
    }

    let response = client.post(url).multipart(form).send().await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

    if !status.is_success() || body["ok"] != true {
        let description = body["description"]
            .as_str()
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"));
        return Err(sink_error(format!(
            "sendDocument returned {}: {}",
            status.as_u16(),
            description
        )));
    }
    Ok(())
}

/// Heavy-path session against a large-file capable Bot API endpoint
pub struct BotApiSession {
    client: reqwest::Client,
    url: String,
}

impl BotApiSession {
    /// Session posting to `{api_base}/bot{token}/sendDocument` without a request timeout
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("seedrelay")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: send_document_url(api_base, token),
        })
    }
}

#[async_trait]
impl HeavySession for BotApiSession {
    async fn upload(&mut self, request: &UploadRequest) -> Result<()> {
        send_document(&self.client, &self.url, request).await
    }
}

/// Delivers files to a chat
pub struct MessagingSink {
    client: reqwest::Client,
    direct_url: String,
    upload_target: Option<String>,
    direct_threshold: u64,
    max_object_size: u64,
    heavy: HeavyUploadHandle,
    tools: MediaTools,
}

impl MessagingSink {
    /// Build the sink and start its heavy-path actor
    pub fn new(config: &MessagingConfig, tools: MediaTools) -> Result<Self> {
        let token = sanitize_secret(&config.bot_token);
        if token.is_empty() {
            return Err(Error::NotConfigured("messaging bot token".to_string()));
        }
        let heavy_base = config
            .heavy_api_base
            .clone()
            .unwrap_or_else(|| config.api_base.clone());
        let session = BotApiSession::new(&heavy_base, &token)?;
        let heavy = HeavyUploadHandle::spawn(Box::new(session), HEAVY_PAUSE)?;
        Self::with_heavy(config, tools, heavy)
    }

    /// Build the sink around an existing heavy-path handle
    pub fn with_heavy(
        config: &MessagingConfig,
        tools: MediaTools,
        heavy: HeavyUploadHandle,
    ) -> Result<Self> {
        let token = sanitize_secret(&config.bot_token);
        let client = reqwest::Client::builder()
            .timeout(config.upload_timeout)
            .user_agent("seedrelay")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            direct_url: send_document_url(&config.api_base, &token),
            upload_target: config
                .upload_target
                .as_deref()
                .map(sanitize_secret)
                .filter(|t| !t.is_empty()),
            direct_threshold: config.direct_threshold,
            max_object_size: config.max_object_size,
            heavy,
            tools,
        })
    }

    async fn send(&self, request: UploadRequest, size: u64) -> Result<()> {
        if size < self.direct_threshold {
            tracing::debug!(file = ?request.path, size, "Direct upload");
            send_document(&self.client, &self.direct_url, &request).await
        } else {
            tracing::debug!(file = ?request.path, size, "Heavy upload");
            self.heavy.upload(request).await
        }
    }
}

#[async_trait]
impl Sink for MessagingSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Messaging
    }

    fn max_object_size(&self) -> Option<u64> {
        Some(self.max_object_size)
    }

    async fn deliver(&self, file: &Path, owner_ref: Option<&str>) -> Result<()> {
        let target = self
            .upload_target
            .clone()
            .or_else(|| owner_ref.map(str::to_string))
            .ok_or_else(|| sink_error("no delivery target: set an upload target or an owner"))?;

        let size = tokio::fs::metadata(file).await?.len();
        let caption = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let thumbnail = if has_extension(file, PREVIEW_EXTENSIONS) {
            generate_preview(self.tools.ffmpeg(), file).await
        } else {
            None
        };

        let request = UploadRequest {
            path: file.to_path_buf(),
            target,
            caption,
            thumbnail: thumbnail.clone(),
        };
        let result = self.send(request, size).await;

        if let Some(thumb) = thumbnail {
            let _ = tokio::fs::remove_file(&thumb).await;
        }
        result
    }
}
