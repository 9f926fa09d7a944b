//! The long-lived cache worker: lifecycle plus request interception.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::watch;

use crate::config::CacheConfig;
use crate::dispatch::{Route, classify};
use crate::error::{Error, Result};
use crate::install::{self, InstallReport};
use crate::network::Fetcher;
use crate::request::{Origin, Request, parse_url};
use crate::stats::CacheStats;
use crate::store::CacheStorage;
use crate::strategy::{self, DynamicCache, Resolution};

/// Lifecycle of a [`CacheWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, install not started.
    Parsed,
    /// Precaching the manifest.
    Installing,
    /// Precache complete, waiting for activation.
    Installed,
    /// Intercepting requests.
    Activated,
    /// Install failed; the worker will never intercept.
    Redundant,
}

/// Owns the caches and answers intercepted requests.
///
/// The host drives it through [`install`](Self::install),
/// [`activate`](Self::activate) and then one
/// [`handle_fetch`](Self::handle_fetch) per request. Requests are handled
/// independently and may run concurrently; the only state they share is the
/// two cache stores and the statistics counters.
pub struct CacheWorker {
    config: CacheConfig,
    origin_url: Url,
    origin: Origin,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: watch::Sender<WorkerState>,
    stats: CacheStats,
}

impl std::fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWorker")
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CacheWorker {
    /// Creates a worker in the [`WorkerState::Parsed`] state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a manifest entry
    /// does not resolve against the origin.
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let origin_url = parse_url(&config.origin)?;
        let origin = Origin::of(&origin_url);
        let worker = Self {
            config,
            origin_url,
            origin,
            storage,
            fetcher,
            state: watch::channel(WorkerState::Parsed).0,
            stats: CacheStats::new(),
        };
        worker.manifest()?;
        Ok(worker)
    }

    /// Returns the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the worker's own origin.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Returns the origin as a URL, for resolving relative paths.
    #[must_use]
    pub const fn origin_url(&self) -> &Url {
        &self.origin_url
    }

    /// Returns the request counters.
    #[must_use]
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the cache storage.
    #[must_use]
    pub fn storage(&self) -> &dyn CacheStorage {
        self.storage.as_ref()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes lifecycle changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Worker state {previous:?} -> {state:?}");
        }
    }

    /// Resolves the manifest into requests against the origin.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be resolved.
    pub fn manifest(&self) -> Result<Vec<Request>> {
        self.config
            .manifest
            .iter()
            .map(|entry| Request::get_relative(&self.origin_url, entry))
            .collect()
    }

    /// Handles the install signal: precaches the manifest.
    ///
    /// On failure the worker becomes [`WorkerState::Redundant`] and the
    /// error is returned so the host can refuse to activate it.
    ///
    /// # Errors
    ///
    /// Returns the first manifest failure or a store error.
    pub async fn install(&self) -> Result<InstallReport> {
        self.set_state(WorkerState::Installing);
        let result = async {
            let manifest = self.manifest()?;
            install::populate(
                self.storage.as_ref(),
                &self.config.static_cache_name(),
                self.fetcher.as_ref(),
                &manifest,
                self.config.install_concurrency,
            )
            .await
        }
        .await;

        match result {
            Ok(report) => {
                self.set_state(WorkerState::Installed);
                Ok(report)
            }
            Err(e) => {
                log::error!("Install failed: {e}");
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Activates an installed worker, deleting caches left by other
    /// versions. Returns the names of the deleted caches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInstalled`] unless the install succeeded, or a
    /// store error from the cleanup.
    pub async fn activate(&self) -> Result<Vec<String>> {
        match self.state() {
            WorkerState::Activated => return Ok(Vec::new()),
            WorkerState::Installed => {}
            _ => return Err(Error::NotInstalled),
        }
        let keep = [
            self.config.static_cache_name(),
            self.config.dynamic_cache_name(),
        ];
        let removed =
            install::remove_stale_caches(self.storage.as_ref(), &self.config.prefix, &keep)
                .await?;
        self.set_state(WorkerState::Activated);
        log::info!("Worker activated for {}", self.origin);
        Ok(removed)
    }

    /// Handles one intercepted request.
    ///
    /// Before activation the request goes straight to the network. After
    /// activation same-origin requests are served cache-first and
    /// cross-origin requests network-first.
    ///
    /// # Errors
    ///
    /// Returns an error when a same-origin cache miss (or a pre-activation
    /// request) fails on the network, or when a cache store fails.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Resolution> {
        let result = if self.state() == WorkerState::Activated {
            match classify(request, &self.origin) {
                Route::CacheFirst => self.serve_cache_first(request).await,
                Route::NetworkFirst => self.serve_network_first(request).await,
            }
        } else {
            self.stats.record_passthrough();
            self.fetcher.fetch(request).await.map(Resolution::Passthrough)
        };

        if let Err(ref e) = result {
            self.stats.record_error();
            log::warn!("{} {} failed: {e}", request.method(), request.url());
        }
        result
    }

    async fn serve_cache_first(&self, request: &Request) -> Result<Resolution> {
        let cache = self.storage.open(&self.config.static_cache_name()).await?;
        let resolution = strategy::cache_first(cache.as_ref(), self.fetcher.as_ref(), request).await?;
        if matches!(resolution, Resolution::Static(_)) {
            self.stats.record_static_hit();
        } else {
            self.stats.record_static_miss();
            self.stats.record_network();
        }
        Ok(resolution)
    }

    async fn serve_network_first(&self, request: &Request) -> Result<Resolution> {
        let dynamic_name = self.config.dynamic_cache_name();
        let dynamic = DynamicCache {
            name: &dynamic_name,
            max_entries: self.config.dynamic_max_entries,
        };
        let resolution =
            strategy::network_first(self.storage.as_ref(), dynamic, self.fetcher.as_ref(), request)
                .await?;

        match resolution {
            Resolution::Network(_) => self.stats.record_network(),
            Resolution::Dynamic(_) => self.stats.record_dynamic_fallback(),
            Resolution::Unavailable => return self.offline_fallback().await,
            _ => {}
        }
        Ok(resolution)
    }

    async fn offline_fallback(&self) -> Result<Resolution> {
        let Some(ref entry) = self.config.offline_fallback else {
            self.stats.record_unavailable();
            return Ok(Resolution::Unavailable);
        };
        let fallback = Request::get_relative(&self.origin_url, entry)?;
        let cache = self.storage.open(&self.config.static_cache_name()).await?;
        if let Some(response) = cache.match_request(&fallback).await? {
            self.stats.record_offline_fallback();
            Ok(Resolution::Offline(response))
        } else {
            self.stats.record_unavailable();
            Ok(Resolution::Unavailable)
        }
    }

    /// Returns every cache name with its entry count.
    ///
    /// # Errors
    ///
    /// Returns an error if a cache cannot be listed or opened.
    pub async fn cache_summary(&self) -> Result<Vec<(String, usize)>> {
        let mut summary = Vec::new();
        for name in self.storage.names().await? {
            let cache = self.storage.open(&name).await?;
            summary.push((name, cache.len().await?));
        }
        Ok(summary)
    }
}
