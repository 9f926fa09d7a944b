//! Origin-based routing of intercepted requests.

use crate::request::{Origin, Request};

/// The strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Same-origin: static cache, then network.
    CacheFirst,
    /// Cross-origin: network, then dynamic cache.
    NetworkFirst,
}

/// Chooses a strategy by comparing the request's origin with `own`.
///
/// Purely synchronous: classification happens before any cache or network
/// work starts.
#[must_use]
pub fn classify(request: &Request, own: &Origin) -> Route {
    if request.origin().is_same(own) {
        Route::CacheFirst
    } else {
        Route::NetworkFirst
    }
}
