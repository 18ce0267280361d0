//! Backend selection for new candidates.
//!
//! Order of precedence:
//! 1. a feed's forced backend
//! 2. non-torrent links go to the seedbox
//! 3. private feeds go to the seedbox
//! 4. content the caching resolver already holds goes to the resolver
//!
//! Every failure of the cache check (resolver not configured, no parseable info hash,
//! network or API error) routes to the seedbox.

use std::sync::Arc;

use crate::backends::AcquisitionBackend;
use crate::types::{BackendKind, FeedConfig};

/// Whether a link points at torrent content (`magnet:` or a `.torrent` file)
pub fn is_torrent_link(link: &str) -> bool {
    if link.starts_with("magnet:") {
        return true;
    }
    // ignore a query string when looking at the suffix
    let path = link.split(['?', '#']).next().unwrap_or(link);
    path.to_ascii_lowercase().ends_with(".torrent")
}

/// Chooses the acquisition backend for a candidate
#[derive(Clone, Default)]
pub struct Router {
    resolver: Option<Arc<dyn AcquisitionBackend>>,
}

impl Router {
    /// Router consulting `resolver` for cache checks (None when it is not configured)
    pub fn new(resolver: Option<Arc<dyn AcquisitionBackend>>) -> Self {
        Self { resolver }
    }

    /// Pick a backend for `link` coming from `feed`
    pub async fn decide(&self, feed: &FeedConfig, link: &str) -> BackendKind {
        self.route(feed.forced_backend, feed.private_flag, link).await
    }

    /// Pick a backend for `link` outside of any feed
    pub async fn route(&self, forced: Option<BackendKind>, private: bool, link: &str) -> BackendKind {
        if let Some(forced) = forced {
            tracing::debug!(backend = %forced, "Using forced backend");
            return forced;
        }

        if !is_torrent_link(link) {
            return BackendKind::Seedbox;
        }

        if private {
            tracing::debug!("Private feed, using seedbox");
            return BackendKind::Seedbox;
        }

        let Some(resolver) = &self.resolver else {
            tracing::info!("Cache resolver not configured, using seedbox");
            return BackendKind::Seedbox;
        };

        match resolver.is_cached(link).await {
            Ok(true) => {
                tracing::info!("Cached on resolver, using it");
                BackendKind::CacheResolver
            }
            Ok(false) => {
                tracing::info!("Not cached on resolver, using seedbox");
                BackendKind::Seedbox
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache check failed, using seedbox");
                BackendKind::Seedbox
            }
        }
    }
}
