//! SQLite persistence layer for seedrelay
//!
//! Single-process durable state store. Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`markers`] — Feed seen-sets, processed markers and delivery intents
//! - [`jobs`] — External tool job records
//! - [`ledger`] — Content-hash upload ledger
//! - [`feeds`] — Persisted feed configurations
//! - [`item_status`] — Latest stage per transfer item, indexed by stage

use sqlx::{FromRow, sqlite::SqlitePool};

mod feeds;
mod item_status;
mod jobs;
mod ledger;
mod markers;
mod migrations;

/// How long job records are kept, matching the Redis key expiry
pub const JOB_TTL_SECS: i64 = 24 * 60 * 60;

/// Item status row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct ItemStatusRow {
    /// Transfer id
    pub item_id: i64,
    /// Display name
    pub name: String,
    /// Stage code (see [`crate::types::Stage::to_i32`])
    pub stage: i32,
    /// Sink name
    pub sink_kind: String,
    /// Failure description
    pub error: Option<String>,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// Upload ledger row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    /// Hex SHA-256 of the delivered file
    pub content_hash: String,
    /// Sink name
    pub sink_kind: String,
    /// JSON metadata
    pub metadata: String,
    /// Unix timestamp of delivery
    pub delivered_at: i64,
}

/// Database handle for seedrelay
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
