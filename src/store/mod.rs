//! Named key-value response caches.
//!
//! A [`CacheStorage`] hands out named [`CacheStore`]s, creating them on first
//! open. Stores map a request's identity (its URL without fragment, refined
//! by the stored response's `Vary` header) to a buffered response. Each
//! put or match on a single key is atomic; there are no cross-key
//! transactions.
//!
//! Two backends exist: [`MemoryStorage`] for tests and ephemeral hosts, and
//! [`DiskStorage`], whose entries survive restarts.

mod disk;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{StreamExt, stream};
use reqwest::Method;

use crate::error::{Error, Result};
use crate::network::Fetcher;
use crate::request::Request;
use crate::response::Response;

pub use disk::{DiskStorage, DiskStore};
pub use memory::{MemoryStorage, MemoryStore};

/// A stored response together with what is needed to match it again.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key (URL without fragment).
    pub key: String,
    /// Request header values captured for every header named by `Vary`.
    pub vary: Vec<(String, Option<String>)>,
    /// The stored response.
    pub response: Response,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// Store-local write sequence; higher is newer.
    pub seq: u64,
}

impl CacheEntry {
    /// Captures `response` for `request`.
    #[must_use]
    pub fn new(request: &Request, response: Response, seq: u64) -> Self {
        let vary = response
            .vary()
            .into_iter()
            .filter(|name| name != "*")
            .map(|name| {
                let value = request.header_str(&name).map(ToString::to_string);
                (name, value)
            })
            .collect();
        Self {
            key: request.cache_key(),
            vary,
            response,
            stored_at: Utc::now(),
            seq,
        }
    }

    /// Returns true if this entry answers `request`.
    ///
    /// Only `GET` and `HEAD` lookups match. Every header captured through
    /// `Vary` must carry the same value on `request`; `Vary: *` never
    /// matches.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        if !request.is_cacheable_lookup() || request.cache_key() != self.key {
            return false;
        }
        if self.response.vary().iter().any(|name| name == "*") {
            return false;
        }
        self.vary
            .iter()
            .all(|(name, value)| request.header_str(name) == value.as_deref())
    }
}

/// Rejects requests a store cannot key.
pub(crate) fn ensure_storable(request: &Request) -> Result<()> {
    if request.method() == Method::GET {
        Ok(())
    } else {
        Err(Error::UnsupportedMethod(request.method().to_string()))
    }
}

/// A single named cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the cache name.
    fn name(&self) -> &str;

    /// Looks up a stored response for `request`.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

    /// Stores `response` for `request`, replacing any previous entry.
    ///
    /// Only `GET` requests can be stored.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// Removes the entry for `request`, returning whether one existed.
    async fn delete(&self, request: &Request) -> Result<bool>;

    /// Returns all keys, oldest first.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Returns the number of entries.
    async fn len(&self) -> Result<usize>;

    /// Returns true if the cache holds no entries.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Evicts the oldest entries until at most `max_entries` remain.
    /// Returns the number evicted.
    async fn trim(&self, max_entries: usize) -> Result<usize>;

    /// Fetches every request and stores all responses, or none of them.
    ///
    /// Fetches run concurrently, at most `concurrency` at a time. A
    /// connectivity failure or a non-2xx status on any entry fails the whole
    /// operation before anything is written. If a write fails, the entries
    /// already written by this call are removed again. Returns the number of
    /// body bytes stored.
    async fn add_all(
        &self,
        fetcher: &dyn Fetcher,
        requests: &[Request],
        concurrency: usize,
    ) -> Result<u64> {
        let fetches: Vec<_> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| fetch_for_install(fetcher, index, request))
            .collect();
        let fetched: Vec<Result<(usize, Response)>> = stream::iter(fetches)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut responses = fetched.into_iter().collect::<Result<Vec<_>>>()?;
        responses.sort_by_key(|(index, _)| *index);

        let mut total_bytes = 0u64;
        let mut written: Vec<&Request> = Vec::with_capacity(responses.len());
        for (index, response) in responses {
            let request = &requests[index];
            let size = response.body().len() as u64;
            if let Err(e) = self.put(request, response).await {
                for done in written {
                    if let Err(undo) = self.delete(done).await {
                        log::warn!("{}: failed to roll back {}: {undo}", self.name(), done.url());
                    }
                }
                return Err(Error::Install {
                    url: request.url().to_string(),
                    source: Box::new(e),
                });
            }
            written.push(request);
            total_bytes += size;
        }
        Ok(total_bytes)
    }
}

/// Fetches one manifest entry, rejecting non-2xx responses.
fn fetch_for_install<'a>(
    fetcher: &'a dyn Fetcher,
    index: usize,
    request: &'a Request,
) -> BoxFuture<'a, Result<(usize, Response)>> {
    Box::pin(async move {
        let url = request.url().to_string();
        let response = fetcher.fetch(request).await.map_err(|e| Error::Install {
            url: url.clone(),
            source: Box::new(e),
        })?;
        if !response.is_success() {
            return Err(Error::Install {
                url: url.clone(),
                source: Box::new(Error::Status {
                    url,
                    status: response.status().as_u16(),
                }),
            });
        }
        Ok((index, response))
    })
}

/// Opens, lists and deletes named caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the cache called `name`, creating it if absent. Opening the same
    /// name twice yields handles onto the same entries.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>>;

    /// Returns true if a cache called `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Deletes the cache called `name`, returning whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Returns the names of all caches, sorted.
    async fn names(&self) -> Result<Vec<String>>;
}
