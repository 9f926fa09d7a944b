//! precache - a request-interception cache with install-time precaching.
//!
//! A [`CacheWorker`] precaches a fixed manifest of static assets into a
//! static cache when installed. Once activated it answers every intercepted
//! request by origin:
//!
//! - same-origin requests are served **cache-first** from the static cache,
//!   falling back to the network without writing the response back;
//! - cross-origin requests are served **network-first**, keeping a copy in a
//!   dynamic cache that is used when the network fails.
//!
//! Caches sit behind the [`CacheStorage`] / [`CacheStore`] traits and the
//! network behind [`Fetcher`], so the worker can run in any host that can
//! intercept a request and hand back a response. The `server` feature ships
//! one such host: an HTTP proxy ([`proxy`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use precache::{CacheConfig, CacheWorker, HttpFetcher, MemoryStorage, NetworkConfig, Request};
//!
//! # async fn example() -> precache::Result<()> {
//! let config = CacheConfig::new()
//!     .with_origin("http://localhost:9000")
//!     .with_manifest(["/", "/static/css/app.css"]);
//! let worker = CacheWorker::new(
//!     config,
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(HttpFetcher::new(&NetworkConfig::default())?),
//! )?;
//!
//! worker.install().await?;
//! worker.activate().await?;
//!
//! let resolution = worker
//!     .handle_fetch(&Request::get("http://localhost:9000/static/css/app.css")?)
//!     .await?;
//! println!("served from {}", resolution.source());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod install;
pub mod network;
#[cfg(feature = "server")]
pub mod proxy;
pub mod request;
pub mod response;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod worker;

// Re-export main types for convenience
pub use config::{CacheConfig, NetworkConfig, ProxyConfig, StorageBackend, StorageConfig, WorkerConfig};
pub use dispatch::{Route, classify};
pub use error::{Error, Result};
pub use format::{format_bytes, format_elapsed};
pub use install::InstallReport;
pub use network::{Fetcher, HttpFetcher};
pub use request::{Origin, Request};
pub use response::Response;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{CacheEntry, CacheStorage, CacheStore, DiskStorage, MemoryStorage};
pub use strategy::Resolution;
pub use worker::{CacheWorker, WorkerState};
