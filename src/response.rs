//! Responses as seen by the caches: status, headers and a fully buffered body.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, VARY};

/// A buffered response. Cloning shares the body buffer.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Creates a response from its parts.
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Creates a `200 OK` response with the given body and no headers.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body.into())
    }

    /// Adds a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns the status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the lowercase header names listed in `Vary`.
    ///
    /// `Vary: *` is returned as a single `"*"` entry.
    #[must_use]
    pub fn vary(&self) -> Vec<String> {
        self.headers
            .get_all(VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Splits the response into its parts.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vary_splits_and_lowercases() {
        let resp = Response::ok("x")
            .with_header(VARY, HeaderValue::from_static("Accept-Encoding, Origin"))
            .with_header(VARY, HeaderValue::from_static("User-Agent"));
        assert_eq!(resp.vary(), vec!["accept-encoding", "origin", "user-agent"]);
    }

    #[test]
    fn vary_star() {
        let resp = Response::ok("x").with_header(VARY, HeaderValue::from_static("*"));
        assert_eq!(resp.vary(), vec!["*"]);
    }

    #[test]
    fn clone_shares_body() {
        let resp = Response::ok(vec![1u8; 64]);
        let dup = resp.clone();
        assert_eq!(resp.body().as_ptr(), dup.body().as_ptr());
        assert!(dup.is_success());
    }
}
