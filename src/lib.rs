//! # seedrelay
//!
//! Torrent-to-cloud transfer pipeline: content is acquired through a debrid cache
//! resolver or a private seedbox, fetched over HTTP or SFTP, packaged to fit the
//! destination, and delivered to a messaging channel or an object-storage drive.
//!
//! ## Design Philosophy
//!
//! seedrelay is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Restart-safe** - Completion markers and the upload ledger live in a state store,
//!   so nothing is delivered twice after a crash
//! - **Sensible defaults** - Every configuration section can be omitted
//!
//! ## Quick Start
//!
//! ```no_run
//! use seedrelay::{Config, TransferManager, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let manager = TransferManager::new(config).await?;
//!
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     manager.start_monitor();
//!     manager.start_feed_scheduler();
//!     run_with_shutdown(manager).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Storage-aware admission backlog
pub mod admission;
/// Cache resolver and seedbox clients
pub mod backends;
/// Configuration types
pub mod config;
/// SQLite persistence layer
pub mod db;
/// Error types
pub mod error;
/// Feed subscriptions and polling
pub mod feeds;
/// HTTP and SFTP fetching
pub mod fetcher;
/// External downloader jobs
pub mod jobs;
/// Completion monitor
pub mod monitor;
/// Hashing, zipping and splitting before delivery
pub mod packager;
/// Transfer pipeline (decomposed into focused submodules)
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Backend selection for new links
pub mod router;
/// Delivery destinations
pub mod sinks;
/// Durable state store
pub mod state;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use admission::{AdmissionQueue, DiskSpaceProbe, SpaceProbe};
pub use backends::{AcquisitionBackend, DebridClient, SeedboxClient};
pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, Error, Result, TransferError};
pub use feeds::FeedManager;
pub use jobs::JobRunner;
pub use monitor::CompletionMonitor;
pub use pipeline::{Components, TransferManager};
pub use sinks::{Sink, SinkDispatcher};
pub use state::{StateStore, open_state_store};
pub use types::{
    BackendKind, Event, FeedConfig, IntentRecord, ItemStatusRecord, JobRecord, JobStatus,
    SinkKind, Stage, TransferId, TransferItem,
};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal and then calls the manager's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(manager: TransferManager) -> Result<()> {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
