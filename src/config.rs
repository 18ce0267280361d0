//! Configuration types for seedrelay
//!
//! The crate never reads environment variables or files itself: callers build a
//! [`Config`] (usually by deserializing one) and hand it to
//! [`TransferManager::new`](crate::TransferManager::new). Optional backends and sinks
//! are `None` when not configured; the corresponding component is then simply not
//! constructed.

use crate::types::SinkKind;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the transfer manager
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local storage and worker pool settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retry policy for HTTP fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Completion monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Feed polling settings
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// State store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Cache-resolver backend (None = not configured)
    #[serde(default)]
    pub debrid: Option<DebridConfig>,

    /// Seedbox backend (None = not configured)
    #[serde(default)]
    pub seedbox: Option<SeedboxConfig>,

    /// Messaging sink (None = not configured)
    #[serde(default)]
    pub messaging: Option<MessagingConfig>,

    /// Object-storage sink (None = not configured)
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,

    /// External tool paths and job limits
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Splitting and folder packaging
    #[serde(default)]
    pub packaging: PackagingConfig,
}

/// Local storage and worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory transfers are fetched into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Free space that must remain after an item is admitted (default: 20 GiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Maximum concurrent transfers (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            min_free_space: default_min_free_space(),
            max_concurrent_transfers: default_max_concurrent(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 4, i.e. 5 attempts in total)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Completion monitor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between poll cycles (default: 20 seconds)
    #[serde(default = "default_monitor_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// How many recent cache-resolver items to list per cycle (default: 20)
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_monitor_interval(),
            list_limit: default_list_limit(),
        }
    }
}

/// Feed polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedsConfig {
    /// Time between feed polls (default: 15 minutes)
    #[serde(default = "default_feed_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Pause between backend API calls while processing feeds (default: 2 seconds)
    #[serde(default = "default_api_delay", with = "duration_serde")]
    pub api_delay: Duration,

    /// Sink recorded as the intent of feed-acquired items
    #[serde(default)]
    pub default_sink: SinkKind,

    /// Owner recorded with feed-acquired items (e.g. the chat to deliver to)
    #[serde(default)]
    pub default_owner: Option<String>,

    /// Remove seedbox torrents after submission unless the feed overrides it
    #[serde(default)]
    pub delete_after_upload: bool,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_feed_interval(),
            api_delay: default_api_delay(),
            default_sink: SinkKind::default(),
            default_owner: None,
            delete_after_upload: false,
        }
    }
}

/// State store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./seedrelay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Redis URL; when set and reachable, Redis is used instead of SQLite
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            redis_url: None,
        }
    }
}

/// Cache-resolver backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebridConfig {
    /// Bearer token (sanitized before use)
    pub api_token: String,

    /// REST base URL
    #[serde(default = "default_debrid_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Seedbox backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedboxConfig {
    /// ruTorrent base URL (e.g. "https://box.example.com/rutorrent")
    pub rpc_url: String,

    /// ruTorrent user
    pub username: String,

    /// ruTorrent password
    pub password: String,

    /// SFTP host (default: host part of `rpc_url`)
    #[serde(default)]
    pub sftp_host: Option<String>,

    /// SFTP port (default: 22)
    #[serde(default = "default_sftp_port")]
    pub sftp_port: u16,

    /// SFTP user (default: ruTorrent user)
    #[serde(default)]
    pub sftp_username: Option<String>,

    /// SFTP password (default: ruTorrent password)
    #[serde(default)]
    pub sftp_password: Option<String>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl SeedboxConfig {
    /// SFTP host, derived from the RPC URL when not set explicitly
    pub fn resolved_sftp_host(&self) -> Option<String> {
        self.sftp_host.clone().or_else(|| {
            url::Url::parse(&self.rpc_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        })
    }

    /// SFTP user, falling back to the ruTorrent user
    pub fn resolved_sftp_username(&self) -> String {
        self.sftp_username
            .clone()
            .unwrap_or_else(|| self.username.clone())
    }

    /// SFTP password, falling back to the ruTorrent password
    pub fn resolved_sftp_password(&self) -> String {
        self.sftp_password
            .clone()
            .unwrap_or_else(|| self.password.clone())
    }
}

/// Messaging sink configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Bot token
    pub bot_token: String,

    /// Bot API base URL for small uploads (default: "https://api.telegram.org")
    #[serde(default = "default_messaging_api_base")]
    pub api_base: String,

    /// Large-file capable endpoint used by the heavy-path session (default: `api_base`)
    #[serde(default)]
    pub heavy_api_base: Option<String>,

    /// Chat that receives every upload; falls back to the item's owner
    #[serde(default)]
    pub upload_target: Option<String>,

    /// Files at or above this size use the heavy path (default: 50 MiB)
    #[serde(default = "default_direct_threshold")]
    pub direct_threshold: u64,

    /// Largest single object the service accepts (default: 2 GiB - 1 KiB)
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Timeout for direct uploads (default: 300 seconds)
    #[serde(default = "default_upload_timeout", with = "duration_serde")]
    pub upload_timeout: Duration,
}

/// Object-storage sink configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Sync destination passed to the tool (default: "gdrive:/")
    #[serde(default = "default_object_destination")]
    pub destination: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            destination: default_object_destination(),
        }
    }
}

/// External tool paths and job limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to ffprobe (auto-detected if None)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Path to rclone (auto-detected if None)
    #[serde(default)]
    pub rclone_path: Option<PathBuf>,

    /// Path to the media downloader tool, e.g. yt-dlp (auto-detected if None)
    #[serde(default)]
    pub downloader_path: Option<PathBuf>,

    /// Whether to search PATH for binaries when explicit paths are not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Maximum runtime of one downloader job (default: 600 seconds)
    #[serde(default = "default_job_max_runtime", with = "duration_serde")]
    pub job_max_runtime: Duration,

    /// Concurrent downloader jobs (default: 2)
    #[serde(default = "default_job_workers")]
    pub job_workers: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            rclone_path: None,
            downloader_path: None,
            search_path: true,
            job_max_runtime: default_job_max_runtime(),
            job_workers: default_job_workers(),
        }
    }
}

impl ToolsConfig {
    /// Explicit path when configured, else a PATH lookup when `search_path` is enabled
    pub fn resolve_binary(&self, explicit: Option<&PathBuf>, name: &str) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.clone());
        }
        if self.search_path {
            return which::which(name).ok();
        }
        None
    }
}

/// Splitting and folder packaging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Size of each split part (default: 1900 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Headroom kept below a sink's single-object limit when sizing parts (default: 10 MiB)
    ///
    /// Parts are at most `min(chunk_size, limit - safety_margin)` bytes. A margin that
    /// would leave nothing falls back to the limit itself.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: u64,

    /// Folder name keywords that trigger zipping (case-insensitive substring match)
    #[serde(default = "default_zip_keywords")]
    pub zip_keywords: Vec<String>,

    /// Largest folder zipped for the messaging sink (default: 100 MiB)
    #[serde(default = "default_max_zip_size")]
    pub max_zip_size: u64,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            safety_margin: default_safety_margin(),
            zip_keywords: default_zip_keywords(),
            max_zip_size: default_max_zip_size(),
        }
    }
}

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_min_free_space() -> u64 {
    20 * GIB
}

fn default_max_concurrent() -> usize {
    2
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./seedrelay.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_list_limit() -> usize {
    20
}

fn default_feed_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_api_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_debrid_base_url() -> String {
    "https://api.real-debrid.com/rest/1.0".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_sftp_port() -> u16 {
    22
}

fn default_messaging_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_direct_threshold() -> u64 {
    50 * MIB
}

fn default_max_object_size() -> u64 {
    2 * GIB - 1024
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_object_destination() -> String {
    "gdrive:/".to_string()
}

fn default_job_max_runtime() -> Duration {
    Duration::from_secs(600)
}

fn default_job_workers() -> usize {
    2
}

fn default_chunk_size() -> u64 {
    1900 * MIB
}

fn default_safety_margin() -> u64 {
    10 * MIB
}

fn default_zip_keywords() -> Vec<String> {
    ["pic", "pics", "image", "images"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_zip_size() -> u64 {
    100 * MIB
}

// Duration serialization helper (as whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.storage.min_free_space, 20 * GIB);
        assert_eq!(config.storage.max_concurrent_transfers, 2);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(20));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.packaging.chunk_size, 1900 * MIB);
        assert_eq!(config.packaging.safety_margin, 10 * MIB);
        assert!(config.debrid.is_none(), "optional backends default to None");
        assert!(config.messaging.is_none());
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = MonitorConfig {
            poll_interval: Duration::from_secs(45),
            list_limit: 5,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 45);

        let back: MonitorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.poll_interval, Duration::from_secs(45));
    }

    #[test]
    fn debrid_config_fills_base_url_and_timeout() {
        let config: DebridConfig = serde_json::from_str(r#"{"api_token":"abc"}"#).unwrap();
        assert_eq!(config.base_url, "https://api.real-debrid.com/rest/1.0");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn seedbox_sftp_settings_fall_back_to_rpc_settings() {
        let config: SeedboxConfig = serde_json::from_str(
            r#"{"rpc_url":"https://box.example.com/rutorrent","username":"u","password":"p"}"#,
        )
        .unwrap();

        assert_eq!(config.resolved_sftp_host().as_deref(), Some("box.example.com"));
        assert_eq!(config.sftp_port, 22);
        assert_eq!(config.resolved_sftp_username(), "u");
        assert_eq!(config.resolved_sftp_password(), "p");
    }

    #[test]
    fn explicit_sftp_settings_win() {
        let config = SeedboxConfig {
            rpc_url: "https://box.example.com/rutorrent".into(),
            username: "u".into(),
            password: "p".into(),
            sftp_host: Some("files.example.com".into()),
            sftp_port: 2222,
            sftp_username: Some("sftp-user".into()),
            sftp_password: Some("sftp-pass".into()),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(config.resolved_sftp_host().as_deref(), Some("files.example.com"));
        assert_eq!(config.resolved_sftp_username(), "sftp-user");
        assert_eq!(config.resolved_sftp_password(), "sftp-pass");
    }

    #[test]
    fn messaging_defaults_match_service_limits() {
        let config: MessagingConfig = serde_json::from_str(r#"{"bot_token":"t"}"#).unwrap();
        assert_eq!(config.direct_threshold, 50 * MIB);
        assert_eq!(config.max_object_size, 2 * GIB - 1024);
        assert!(config.heavy_api_base.is_none());
    }

    #[test]
    fn explicit_tool_path_wins_and_search_can_be_disabled() {
        let mut tools = ToolsConfig {
            search_path: false,
            ..Default::default()
        };
        assert_eq!(tools.resolve_binary(None, "ffmpeg"), None);

        let explicit = PathBuf::from("/opt/ffmpeg/bin/ffmpeg");
        tools.search_path = true;
        assert_eq!(
            tools.resolve_binary(Some(&explicit), "ffmpeg"),
            Some(explicit.clone())
        );
        assert_eq!(
            tools.resolve_binary(None, "definitely-not-a-real-binary-xyz"),
            None
        );
    }

    #[test]
    fn default_zip_keywords_cover_picture_folders() {
        let config = PackagingConfig::default();
        assert_eq!(config.zip_keywords, vec!["pic", "pics", "image", "images"]);
        assert_eq!(config.max_zip_size, 100 * MIB);
    }
}
