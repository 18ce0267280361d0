//! Core types for seedrelay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Maximum number of entry ids remembered per feed
pub const SEEN_ITEM_LIMIT: usize = 1000;

static LAST_TRANSFER_ID: AtomicI64 = AtomicI64::new(0);

/// Unique identifier for a transfer item
///
/// Ids are microsecond timestamps bumped to stay strictly increasing, so they remain
/// unique across restarts against the same state store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub i64);

impl TransferId {
    /// Generate a fresh, strictly increasing id
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_micros();
        let mut prev = LAST_TRANSFER_ID.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match LAST_TRANSFER_ID.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Self(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TransferId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for TransferId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TransferId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TransferId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Delivery sink
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Chat messaging service (direct upload plus a heavy-path session for large files)
    #[default]
    Messaging,
    /// Object storage reached through an external sync tool
    ObjectStorage,
}

impl SinkKind {
    /// Stable string form used as a storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Messaging => "messaging",
            SinkKind::ObjectStorage => "object_storage",
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SinkKind {
    type Err = crate::Error;

    /// Accepts the canonical names plus the legacy "telegram" / "gdrive" aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "messaging" | "telegram" => Ok(SinkKind::Messaging),
            "object_storage" | "gdrive" | "drive" => Ok(SinkKind::ObjectStorage),
            other => Err(crate::Error::Other(format!("unknown sink kind: {}", other))),
        }
    }
}

/// Acquisition backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Remote caching resolver (debrid service): fast when the content is already cached
    CacheResolver,
    /// Remote seedbox running a torrent client, fetched over SFTP
    Seedbox,
}

impl BackendKind {
    /// Short prefix used in processed markers and intents
    pub fn prefix(&self) -> &'static str {
        match self {
            BackendKind::CacheResolver => "rd",
            BackendKind::Seedbox => "sb",
        }
    }

    /// Idempotency key for an external id on this backend (e.g. `rd_ABC`)
    pub fn marker(&self, external_id: &str) -> String {
        format!("{}_{}", self.prefix(), external_id)
    }

    /// Human-readable backend name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::CacheResolver => "debrid",
            BackendKind::Seedbox => "seedbox",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rd" | "debrid" | "cache_resolver" => Ok(BackendKind::CacheResolver),
            "sb" | "seedbox" => Ok(BackendKind::Seedbox),
            other => Err(crate::Error::Other(format!("unknown backend: {}", other))),
        }
    }
}

/// Lifecycle stage of a transfer item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Accepted, not yet started
    Enqueued,
    /// Parked in the admission backlog until storage frees up
    WaitingOnSpace,
    /// Fetching bytes from the source
    Downloading,
    /// Hashing, deduplicating and splitting
    Packaging,
    /// Delivering to the sink
    Uploading,
    /// Delivered (or skipped as a duplicate)
    Completed,
    /// Failed terminally
    Error,
}

impl Stage {
    /// Convert integer stage code to Stage enum
    pub fn from_i32(stage: i32) -> Self {
        match stage {
            0 => Stage::Enqueued,
            1 => Stage::WaitingOnSpace,
            2 => Stage::Downloading,
            3 => Stage::Packaging,
            4 => Stage::Uploading,
            5 => Stage::Completed,
            _ => Stage::Error,
        }
    }

    /// Convert Stage enum to integer stage code
    pub fn to_i32(&self) -> i32 {
        match self {
            Stage::Enqueued => 0,
            Stage::WaitingOnSpace => 1,
            Stage::Downloading => 2,
            Stage::Packaging => 3,
            Stage::Uploading => 4,
            Stage::Completed => 5,
            Stage::Error => 6,
        }
    }

    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enqueued => "enqueued",
            Stage::WaitingOnSpace => "waiting_on_space",
            Stage::Downloading => "downloading",
            Stage::Packaging => "packaging",
            Stage::Uploading => "uploading",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }

    /// Whether the item has reached a final stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

/// A unit of work flowing through fetch, packaging and delivery
///
/// Owned by exactly one worker while it is processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Unique id
    pub id: TransferId,
    /// `http(s)://…` or `sftp://` + absolute remote path
    pub source_locator: String,
    /// Name shown to users and used for the local file or folder
    pub display_name: String,
    /// Where the content is delivered
    pub sink_kind: SinkKind,
    /// Who asked for it (chat id for the messaging sink)
    pub owner_ref: Option<String>,
    /// Size reported by the backend, used for admission (0 when unknown)
    pub expected_size: u64,
    /// When the item was created
    pub created_at: DateTime<Utc>,
}

impl TransferItem {
    /// Create a new item with a fresh id
    pub fn new(
        source_locator: impl Into<String>,
        display_name: impl Into<String>,
        sink_kind: SinkKind,
        owner_ref: Option<String>,
        expected_size: u64,
    ) -> Self {
        Self {
            id: TransferId::generate(),
            source_locator: source_locator.into(),
            display_name: display_name.into(),
            sink_kind,
            owner_ref,
            expected_size,
            created_at: Utc::now(),
        }
    }
}

/// Delivery intent recorded when content is handed to a backend
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRecord {
    /// Sink to deliver to on completion
    pub sink_kind: SinkKind,
    /// Who asked for it
    #[serde(default)]
    pub owner_ref: Option<String>,
    /// Remove the torrent from the seedbox once its content has been submitted
    #[serde(default)]
    pub delete_after_upload: bool,
}

/// Status of an external downloader-tool job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker
    Queued,
    /// Tool is running
    Running,
    /// Tool exited with status 0
    Done,
    /// Tool exited with a nonzero status
    Failed,
    /// Tool exceeded its maximum runtime and was killed
    Timeout,
    /// Tool could not be started
    Error,
}

/// Persisted record of an external downloader-tool job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Current status
    pub status: JobStatus,
    /// Source URL handed to the tool
    pub url: String,
    /// Output directory
    pub dest: String,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Tool exit code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    /// Captured standard output (truncated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error (truncated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Per-feed configuration and polling state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed URL
    pub url: String,
    /// Always use this backend, skipping the cache check
    #[serde(default)]
    pub forced_backend: Option<BackendKind>,
    /// Private tracker feed: never routed to the cache resolver unless forced
    #[serde(default)]
    pub private_flag: bool,
    /// Remove seedbox torrents once submitted (falls back to the global default)
    #[serde(default)]
    pub delete_after_upload: Option<bool>,
    /// Ids of entries already handled, oldest first
    #[serde(default)]
    pub seen_item_ids: Vec<String>,
    /// End of the previous successful poll (None until the first poll)
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

impl FeedConfig {
    /// Create a feed that has never been polled
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            forced_backend: None,
            private_flag: false,
            delete_after_upload: None,
            seen_item_ids: Vec::new(),
            last_check: None,
        }
    }

    /// Whether an entry id was already handled
    pub fn has_seen(&self, entry_id: &str) -> bool {
        self.seen_item_ids.iter().any(|id| id == entry_id)
    }

    /// Remember an entry id, keeping only the most recent [`SEEN_ITEM_LIMIT`]
    pub fn mark_seen(&mut self, entry_id: impl Into<String>) {
        self.seen_item_ids.push(entry_id.into());
        if self.seen_item_ids.len() > SEEN_ITEM_LIMIT {
            let excess = self.seen_item_ids.len() - SEEN_ITEM_LIMIT;
            self.seen_item_ids.drain(..excess);
        }
    }
}

/// One delivered `(content hash, sink)` pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadLedgerEntry {
    /// SHA-256 of the original file, hex encoded
    pub content_hash: String,
    /// Sink the content was delivered to
    pub sink_kind: SinkKind,
    /// Free-form delivery metadata (file name, size, part count)
    pub metadata: serde_json::Value,
    /// When the delivery finished
    pub delivered_at: DateTime<Utc>,
}

/// Latest known stage of a transfer item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemStatusRecord {
    /// Transfer id
    pub item_id: TransferId,
    /// Display name
    pub name: String,
    /// Current stage
    pub stage: Stage,
    /// Destination sink
    pub sink_kind: SinkKind,
    /// Failure description when `stage` is [`Stage::Error`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the stage was recorded
    pub updated_at: DateTime<Utc>,
}

/// Event emitted during the transfer lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Item admitted for immediate processing
    Queued {
        /// Transfer id
        id: TransferId,
        /// Display name
        name: String,
    },

    /// Item parked until storage frees up
    WaitingOnSpace {
        /// Transfer id
        id: TransferId,
        /// Bytes the item needs
        required: u64,
    },

    /// Single-stream fetch progress, reported in 10% steps
    Downloading {
        /// Transfer id
        id: TransferId,
        /// Progress percentage (0 to 100)
        percent: u8,
    },

    /// Directory fetch progress
    FetchProgress {
        /// Transfer id
        id: TransferId,
        /// Files fetched so far
        files_done: usize,
        /// Files in the directory
        files_total: usize,
    },

    /// Hashing and splitting started
    Packaging {
        /// Transfer id
        id: TransferId,
    },

    /// A part is being delivered
    Uploading {
        /// Transfer id
        id: TransferId,
        /// File being delivered
        file: String,
        /// 1-based part number
        part: usize,
        /// Number of parts for this file
        total_parts: usize,
    },

    /// A file was skipped (already delivered to this sink, or too large to package)
    Skipped {
        /// Transfer id
        id: TransferId,
        /// File or folder name
        file: String,
        /// Why it was skipped
        reason: String,
    },

    /// All files delivered
    TransferComplete {
        /// Transfer id
        id: TransferId,
        /// Display name
        name: String,
    },

    /// Transfer failed terminally
    TransferFailed {
        /// Transfer id
        id: TransferId,
        /// Display name
        name: String,
        /// Error message
        error: String,
    },

    /// A backend reported an item ready for transfer
    BackendItemReady {
        /// Backend that holds the item
        backend: BackendKind,
        /// Backend-specific external id
        external_id: String,
        /// Item name
        name: String,
    },

    /// A feed entry was handed to a backend
    FeedItemAdded {
        /// Feed URL
        feed_url: String,
        /// Entry title
        title: String,
        /// Chosen backend
        backend: BackendKind,
    },

    /// External tool job changed status
    JobUpdated {
        /// Job id
        job_id: String,
        /// New status
        status: JobStatus,
    },

    /// Graceful shutdown finished
    Shutdown,
}
