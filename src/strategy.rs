//! The two fetch strategies and their outcome type.

use crate::error::Result;
use crate::network::Fetcher;
use crate::request::Request;
use crate::response::Response;
use crate::store::{CacheStorage, CacheStore};

/// How an intercepted request was answered.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Served from the static cache.
    Static(Response),
    /// Served from a live network fetch.
    Network(Response),
    /// Network failed; served the last response stored in the dynamic cache.
    Dynamic(Response),
    /// Nothing cached and network failed; served the configured offline asset.
    Offline(Response),
    /// The worker was not active; the request went straight to the network.
    Passthrough(Response),
    /// No content available: network failed and nothing was cached.
    Unavailable,
}

impl Resolution {
    /// Returns the response, if any.
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        match self {
            Self::Static(r)
            | Self::Network(r)
            | Self::Dynamic(r)
            | Self::Offline(r)
            | Self::Passthrough(r) => Some(r),
            Self::Unavailable => None,
        }
    }

    /// Consumes the resolution, returning the response if any.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Static(r)
            | Self::Network(r)
            | Self::Dynamic(r)
            | Self::Offline(r)
            | Self::Passthrough(r) => Some(r),
            Self::Unavailable => None,
        }
    }

    /// Short name of where the response came from.
    #[must_use]
    pub const fn source(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Network(_) => "network",
            Self::Dynamic(_) => "dynamic",
            Self::Offline(_) => "offline",
            Self::Passthrough(_) => "passthrough",
            Self::Unavailable => "unavailable",
        }
    }

    /// Returns true when no content could be produced.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Serves `request` from `static_cache`, falling back to the network.
///
/// A network response on a miss is returned as-is and never written back:
/// the static cache is immutable after install, so a miss fetches again on
/// every later request.
///
/// # Errors
///
/// Propagates cache lookup failures and, on a miss, network failures.
pub async fn cache_first(
    static_cache: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    request: &Request,
) -> Result<Resolution> {
    if let Some(response) = static_cache.match_request(request).await? {
        log::debug!("{}: {} served from cache", static_cache.name(), request.url());
        return Ok(Resolution::Static(response));
    }
    log::debug!("{}: {} missed, fetching", static_cache.name(), request.url());
    let response = fetcher.fetch(request).await?;
    Ok(Resolution::Network(response))
}

/// Settings for the dynamic cache used by [`network_first`].
#[derive(Debug, Clone, Copy)]
pub struct DynamicCache<'a> {
    /// Cache name.
    pub name: &'a str,
    /// Entry bound; oldest entries are evicted after each store.
    pub max_entries: Option<usize>,
}

/// Fetches `request` from the network, keeping a copy in the dynamic cache,
/// and falls back to that cache when the network fails.
///
/// Only `GET` responses are stored. Storing is best-effort: a failed write
/// is logged and the network response still returned. When the network
/// fails and nothing is cached the result is [`Resolution::Unavailable`].
///
/// # Errors
///
/// Returns an error if the dynamic cache cannot be opened or read.
pub async fn network_first(
    storage: &dyn CacheStorage,
    dynamic: DynamicCache<'_>,
    fetcher: &dyn Fetcher,
    request: &Request,
) -> Result<Resolution> {
    let cache = storage.open(dynamic.name).await?;

    match fetcher.fetch(request).await {
        Ok(response) => {
            if request.method() == reqwest::Method::GET {
                store_copy(cache.as_ref(), request, response.clone(), dynamic.max_entries).await;
            }
            Ok(Resolution::Network(response))
        }
        Err(e) => {
            log::info!("Network failed for {}: {e}; trying {}", request.url(), dynamic.name);
            Ok(cache
                .match_request(request)
                .await?
                .map_or(Resolution::Unavailable, Resolution::Dynamic))
        }
    }
}

async fn store_copy(
    cache: &dyn CacheStore,
    request: &Request,
    response: Response,
    max_entries: Option<usize>,
) {
    if let Err(e) = cache.put(request, response).await {
        log::warn!("Failed to store {} in {}: {e}", request.url(), cache.name());
        return;
    }
    if let Some(max) = max_entries {
        match cache.trim(max).await {
            Ok(0) => {}
            Ok(evicted) => log::debug!("Evicted {evicted} entries from {}", cache.name()),
            Err(e) => log::warn!("Failed to trim {}: {e}", cache.name()),
        }
    }
}
