//! Intercepted requests, their origin, and their cache identity.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::error::{Error, Result};

/// The origin of a URL: scheme, host and effective port.
///
/// URLs without a host (`data:`, `file:`) have an opaque origin that is
/// never the same as any other origin, including another opaque one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A `scheme://host:port` tuple.
    Tuple {
        /// Lowercase scheme.
        scheme: String,
        /// Lowercase host.
        host: String,
        /// Port, or the scheme's default port.
        port: Option<u16>,
    },
    /// An origin that only matches nothing.
    Opaque,
}

impl Origin {
    /// Computes the origin of a URL.
    #[must_use]
    pub fn of(url: &Url) -> Self {
        match url.host_str() {
            Some(host) if !host.is_empty() => Self::Tuple {
                scheme: url.scheme().to_ascii_lowercase(),
                host: host.to_ascii_lowercase(),
                port: url.port_or_known_default(),
            },
            _ => Self::Opaque,
        }
    }

    /// Returns true when both origins are tuples with equal components.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Opaque, _) | (_, Self::Opaque) => false,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuple { scheme, host, port } => {
                let default = match scheme.as_str() {
                    "http" | "ws" => Some(80),
                    "https" | "wss" => Some(443),
                    _ => None,
                };
                match port {
                    Some(p) if Some(*p) != default => write!(f, "{scheme}://{host}:{p}"),
                    _ => write!(f, "{scheme}://{host}"),
                }
            }
            Self::Opaque => f.write_str("null"),
        }
    }
}

/// A transient intercepted network operation.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Parses `url` and creates a `GET` request for it.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute URL.
    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, parse_url(url)?))
    }

    /// Resolves `target` against `base` and creates a `GET` request for it.
    ///
    /// Absolute targets keep their own scheme and host, relative ones
    /// (`./`, `/a.css`, `static/app.js`) resolve like a browser would.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be resolved.
    pub fn get_relative(base: &Url, target: &str) -> Result<Self> {
        let url = base.join(target).map_err(|e| Error::InvalidUrl {
            url: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(Method::GET, url))
    }

    /// Adds a header to the request.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the request body forwarded to the network.
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the target URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the origin of the target URL.
    #[must_use]
    pub fn origin(&self) -> Origin {
        Origin::of(&self.url)
    }

    /// Returns true for methods a cache store can answer (`GET`, `HEAD`).
    #[must_use]
    pub fn is_cacheable_lookup(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Returns the cache key for this request: the URL without its fragment.
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Returns the cache key for a URL.
#[must_use]
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Parses an absolute URL.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if `url` does not parse.
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn origin_elides_default_port() {
        assert_eq!(Origin::of(&url("https://example.com/a")).to_string(), "https://example.com");
        assert_eq!(
            Origin::of(&url("http://localhost:9000/a")).to_string(),
            "http://localhost:9000"
        );
    }

    #[test]
    fn explicit_default_port_is_same_origin() {
        let a = Origin::of(&url("http://example.com:80/x"));
        let b = Origin::of(&url("http://example.com/y"));
        assert!(a.is_same(&b));
    }

    #[test]
    fn scheme_host_and_port_all_matter() {
        let base = Origin::of(&url("http://example.com/"));
        assert!(!base.is_same(&Origin::of(&url("https://example.com/"))));
        assert!(!base.is_same(&Origin::of(&url("http://cdn.example.com/"))));
        assert!(!base.is_same(&Origin::of(&url("http://example.com:8080/"))));
    }

    #[test]
    fn opaque_origins_never_match() {
        let a = Origin::of(&url("data:text/plain,hi"));
        assert_eq!(a, Origin::Opaque);
        assert!(!a.is_same(&Origin::Opaque));
        assert_eq!(a.to_string(), "null");
    }

    #[test]
    fn relative_manifest_entries_resolve_against_origin() {
        let base = url("http://localhost:9000/");
        let root = Request::get_relative(&base, "./").unwrap();
        assert_eq!(root.url().as_str(), "http://localhost:9000/");

        let css = Request::get_relative(&base, "./static/css/materialize.min.css").unwrap();
        assert_eq!(
            css.url().as_str(),
            "http://localhost:9000/static/css/materialize.min.css"
        );

        let cdn = Request::get_relative(&base, "https://cdn.example.com/lib.js").unwrap();
        assert_eq!(cdn.url().as_str(), "https://cdn.example.com/lib.js");
    }

    #[test]
    fn cache_key_drops_fragment_keeps_query() {
        let req = Request::get("http://localhost/a.css?v=2#top").unwrap();
        assert_eq!(req.cache_key(), "http://localhost/a.css?v=2");
    }

    #[test]
    fn invalid_url_is_reported() {
        let err = Request::get("not a url").unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn lookup_methods() {
        let get = Request::get("http://localhost/").unwrap();
        assert!(get.is_cacheable_lookup());
        let head = Request::new(Method::HEAD, url("http://localhost/"));
        assert!(head.is_cacheable_lookup());
        let post = Request::new(Method::POST, url("http://localhost/"));
        assert!(!post.is_cacheable_lookup());
    }
}
