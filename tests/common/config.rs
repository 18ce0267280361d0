//! Test configuration helpers: mock-backed configs and .env credentials for live runs

use std::time::Duration;
use tempfile::TempDir;
use seedrelay::config::{DebridConfig, MessagingConfig};
use seedrelay::{Config, SinkKind, TransferManager};

/// Bot token used against the mock messaging API
pub const TEST_BOT_TOKEN: &str = "123:abc";

/// Error type for test configuration
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Config with the cache resolver and messaging sink both pointed at `mock_uri`
///
/// State and downloads live in `temp_dir`; admission never blocks.
pub fn mock_config(temp_dir: &TempDir, mock_uri: &str) -> Config {
    let mut config = Config::default();
    config.storage.download_dir = temp_dir.path().join("downloads");
    config.storage.min_free_space = 0;
    config.persistence.database_path = temp_dir.path().join("state.db");
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;
    config.monitor.poll_interval = Duration::from_millis(200);
    config.feeds.api_delay = Duration::ZERO;
    config.feeds.default_sink = SinkKind::Messaging;
    config.feeds.default_owner = Some("555".to_string());
    config.debrid = Some(DebridConfig {
        api_token: "test-token".to_string(),
        base_url: mock_uri.to_string(),
        timeout: Duration::from_secs(5),
    });
    config.messaging = Some(MessagingConfig {
        bot_token: TEST_BOT_TOKEN.to_string(),
        api_base: mock_uri.to_string(),
        heavy_api_base: None,
        upload_target: None,
        direct_threshold: 1024 * 1024,
        max_object_size: 4 * 1024 * 1024,
        upload_timeout: Duration::from_secs(10),
    });
    config
}

/// Build a manager from [`mock_config`]
pub async fn create_mock_manager(mock_uri: &str) -> Result<(TransferManager, TempDir), ConfigError> {
    let temp_dir = tempfile::tempdir()
        .map_err(|e| ConfigError(format!("Failed to create temp dir: {}", e)))?;
    let manager = TransferManager::new(mock_config(&temp_dir, mock_uri))
        .await
        .map_err(|e| ConfigError(format!("Failed to create manager: {}", e)))?;
    Ok((manager, temp_dir))
}

/// Load cache-resolver credentials from the environment
///
/// Required environment variables:
/// - `DEBRID_API_TOKEN` - API token
///
/// Optional environment variables:
/// - `DEBRID_BASE_URL` - REST base URL (default: the public API)
pub fn load_debrid_config() -> Result<DebridConfig, ConfigError> {
    dotenvy::dotenv().ok();

    let api_token = std::env::var("DEBRID_API_TOKEN")
        .map_err(|_| ConfigError("DEBRID_API_TOKEN not set in environment".to_string()))?;

    let mut config: DebridConfig = serde_json::from_value(serde_json::json!({
        "api_token": api_token,
    }))
    .map_err(|e| ConfigError(format!("Invalid debrid config: {}", e)))?;
    if let Ok(base_url) = std::env::var("DEBRID_BASE_URL") {
        config.base_url = base_url;
    }
    Ok(config)
}

/// Whether live credentials are available
pub fn has_live_credentials() -> bool {
    load_debrid_config().is_ok()
}
