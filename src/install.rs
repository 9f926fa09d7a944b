//! Install-time precaching and activation-time cleanup.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::Result;
use crate::format::{format_bytes, format_elapsed};
use crate::network::Fetcher;
use crate::request::Request;
use crate::store::CacheStorage;

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Identifier of the install signal.
    pub id: Uuid,
    /// Static cache that was populated.
    pub cache_name: String,
    /// Number of manifest entries stored.
    pub entries: usize,
    /// Total body bytes stored.
    pub total_bytes: u64,
    /// Wall time of the population step.
    pub elapsed: Duration,
}

/// Opens `cache_name` and fills it with every manifest request.
///
/// Either every entry is stored or, on the first fetch failure or error
/// status, none is and the error is returned.
///
/// # Errors
///
/// Returns [`Error::Install`](crate::Error::Install) naming the failing
/// entry, or a store error.
pub async fn populate(
    storage: &dyn CacheStorage,
    cache_name: &str,
    fetcher: &dyn Fetcher,
    manifest: &[Request],
    concurrency: usize,
) -> Result<InstallReport> {
    let id = Uuid::new_v4();
    let start = Instant::now();
    log::info!(
        "Install {id}: precaching {} entries into {cache_name}",
        manifest.len()
    );

    let cache = storage.open(cache_name).await?;
    let total_bytes = cache.add_all(fetcher, manifest, concurrency).await?;

    let report = InstallReport {
        id,
        cache_name: cache_name.to_string(),
        entries: manifest.len(),
        total_bytes,
        elapsed: start.elapsed(),
    };
    log::info!(
        "Install {id}: stored {} entries ({}) in {}",
        report.entries,
        format_bytes(report.total_bytes),
        format_elapsed(report.elapsed)
    );
    Ok(report)
}

/// Deletes caches named `{prefix}-…` that are not in `keep`.
///
/// Caches from other prefixes are left alone. Returns the deleted names.
///
/// # Errors
///
/// Returns an error if the caches cannot be listed or deleted.
pub async fn remove_stale_caches(
    storage: &dyn CacheStorage,
    prefix: &str,
    keep: &[String],
) -> Result<Vec<String>> {
    let owned_prefix = format!("{prefix}-");
    let mut removed = Vec::new();
    for name in storage.names().await? {
        if name.starts_with(&owned_prefix) && !keep.contains(&name) && storage.delete(&name).await? {
            log::info!("Removed stale cache {name}");
            removed.push(name);
        }
    }
    Ok(removed)
}
