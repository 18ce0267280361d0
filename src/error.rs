//! Error types for seedrelay
//!
//! A single crate-wide [`Error`] enum is used by every component. Nested enums group
//! the failures of the persistence layer ([`DatabaseError`]) and of individual
//! transfers ([`TransferError`]). Retry classification lives in [`crate::retry`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for seedrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of external tool output kept in an error message
pub const DIAGNOSTIC_LIMIT: usize = 500;

/// Main error type for seedrelay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage.download_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Redis state store error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Transfer-related error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new transfers
    #[error("shutdown in progress: not accepting new transfers")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status returned by a remote endpoint
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Status code returned by the server
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Acquisition backend rejected our credentials
    #[error("{backend} authentication failed")]
    BackendAuth {
        /// Backend name ("debrid", "seedbox")
        backend: String,
    },

    /// Acquisition backend returned an unexpected response
    #[error("{backend} API error: {message}")]
    BackendApi {
        /// Backend name ("debrid", "seedbox")
        backend: String,
        /// What went wrong
        message: String,
    },

    /// An optional component was used without being configured
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// SSH/SFTP transport error
    #[error("remote filesystem error: {0}")]
    Remote(String),

    /// SSH authentication failed
    #[error("remote filesystem authentication failed for {user}@{host}")]
    RemoteAuth {
        /// SSH host
        host: String,
        /// SSH user
        user: String,
    },

    /// Delivery to a sink failed
    #[error("{sink} delivery failed: {message}")]
    Sink {
        /// Sink name ("messaging", "object_storage")
        sink: String,
        /// Failure description (tool diagnostics are truncated)
        message: String,
    },

    /// External tool execution failed (ffmpeg, rclone, yt-dlp, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unsupported scheme, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Transfer-related errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// Source locator could not be parsed or has an unknown scheme
    #[error("unsupported source locator: {0}")]
    UnsupportedLocator(String),

    /// One file of a directory fetch failed, failing the whole batch
    #[error("fetch of {path} failed after {completed}/{total} files: {reason}")]
    BatchFailed {
        /// Remote path of the file that failed
        path: String,
        /// Files fetched before the failure
        completed: usize,
        /// Total files in the batch
        total: usize,
        /// Underlying failure
        reason: String,
    },

    /// Fetched root does not exist locally
    #[error("fetched content not found at {path}")]
    MissingContent {
        /// Path where content was expected
        path: PathBuf,
    },

    /// Packaging step failed
    #[error("packaging {path} failed: {reason}")]
    Packaging {
        /// File or folder being packaged
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
}

impl From<ssh2::Error> for Error {
    fn from(e: ssh2::Error) -> Self {
        Error::Remote(e.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Other(format!("zip error: {}", e))
    }
}

/// Truncate tool diagnostics to [`DIAGNOSTIC_LIMIT`] characters
pub fn truncate_diagnostics(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= DIAGNOSTIC_LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(DIAGNOSTIC_LIMIT).collect();
    out.push_str("...");
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_auth_message_names_backend() {
        let err = Error::BackendAuth {
            backend: "debrid".to_string(),
        };
        assert_eq!(err.to_string(), "debrid authentication failed");
    }

    #[test]
    fn truncate_diagnostics_keeps_short_text() {
        assert_eq!(truncate_diagnostics("  boom \n"), "boom");
    }

    #[test]
    fn truncate_diagnostics_caps_long_text() {
        let long = "x".repeat(DIAGNOSTIC_LIMIT * 2);
        let out = truncate_diagnostics(&long);
        assert_eq!(out.chars().count(), DIAGNOSTIC_LIMIT + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn transfer_error_converts_into_error() {
        let err: Error = TransferError::UnsupportedLocator("ftp://x".into()).into();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(err.to_string().contains("ftp://x"));
    }

    #[test]
    fn io_error_converts_into_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
