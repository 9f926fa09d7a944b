//! Request handling statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Point-in-time copy of a worker's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Same-origin requests answered from the static cache.
    pub static_hits: u64,
    /// Same-origin requests that missed the static cache.
    pub static_misses: u64,
    /// Responses taken from the network, in either strategy.
    pub network_responses: u64,
    /// Cross-origin requests answered from the dynamic cache after a
    /// network failure.
    pub dynamic_fallbacks: u64,
    /// Cross-origin requests answered with the offline fallback asset.
    pub offline_fallbacks: u64,
    /// Cross-origin requests with no content available at all.
    pub unavailable: u64,
    /// Requests that reached the worker before activation.
    pub passthroughs: u64,
    /// Requests that ended in an error.
    pub errors: u64,
    /// Seconds since the worker was created.
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    /// Returns the static cache hit ratio in `[0, 1]`, or `None` before any
    /// same-origin request.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.static_hits + self.static_misses;
        if total == 0 {
            None
        } else {
            Some(self.static_hits as f64 / total as f64)
        }
    }
}

/// Lock-free counters shared by concurrent request tasks.
#[derive(Debug)]
pub struct CacheStats {
    start_time: Instant,
    static_hits: AtomicU64,
    static_misses: AtomicU64,
    network_responses: AtomicU64,
    dynamic_fallbacks: AtomicU64,
    offline_fallbacks: AtomicU64,
    unavailable: AtomicU64,
    passthroughs: AtomicU64,
    errors: AtomicU64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            static_hits: AtomicU64::new(0),
            static_misses: AtomicU64::new(0),
            network_responses: AtomicU64::new(0),
            dynamic_fallbacks: AtomicU64::new(0),
            offline_fallbacks: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            passthroughs: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Counts a request served from the static cache.
    pub fn record_static_hit(&self) {
        self.static_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a same-origin request missing from the static cache.
    pub fn record_static_miss(&self) {
        self.static_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a response served from the network.
    pub fn record_network(&self) {
        self.network_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a network failure answered from the dynamic cache.
    pub fn record_dynamic_fallback(&self) {
        self.dynamic_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request answered with the offline fallback asset.
    pub fn record_offline_fallback(&self) {
        self.offline_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request with neither network nor cached response.
    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request handled before activation.
    pub fn record_passthrough(&self) {
        self.passthroughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request that ended in an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the time since the counters were created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            static_hits: self.static_hits.load(Ordering::Relaxed),
            static_misses: self.static_misses.load(Ordering::Relaxed),
            network_responses: self.network_responses.load(Ordering::Relaxed),
            dynamic_fallbacks: self.dynamic_fallbacks.load(Ordering::Relaxed),
            offline_fallbacks: self.offline_fallbacks.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            passthroughs: self.passthroughs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_default() {
        let stats = CacheStats::default();
        let snap = stats.snapshot();
        assert_eq!(snap.static_hits, 0);
        assert_eq!(snap.errors, 0);
        assert!(snap.hit_ratio().is_none());
    }

    #[test]
    fn counters_accumulate() {
        let stats = CacheStats::new();
        stats.record_static_hit();
        stats.record_static_hit();
        stats.record_static_hit();
        stats.record_static_miss();
        stats.record_network();
        stats.record_unavailable();

        let snap = stats.snapshot();
        assert_eq!(snap.static_hits, 3);
        assert_eq!(snap.static_misses, 1);
        assert_eq!(snap.network_responses, 1);
        assert_eq!(snap.unavailable, 1);
        assert_eq!(snap.hit_ratio(), Some(0.75));
    }

    #[tokio::test]
    async fn concurrent_updates() {
        let stats = std::sync::Arc::new(CacheStats::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let stats = std::sync::Arc::clone(&stats);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        stats.record_network();
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;
        assert_eq!(stats.snapshot().network_responses, 800);
    }
}
