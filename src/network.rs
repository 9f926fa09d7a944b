//! Network fetch abstraction.

use async_trait::async_trait;

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// Performs live network fetches.
///
/// A fetch that reaches the server resolves to a [`Response`] whatever its
/// status; only connectivity failures (DNS, TLS, refused connections,
/// timeouts) are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `request` from the network.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Default fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher with a pooled HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(std::time::Duration::from_secs(60))
            .tcp_keepalive(std::time::Duration::from_secs(30));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut outgoing = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if !request.body().is_empty() {
            outgoing = outgoing.body(request.body().clone());
        }

        let resp = outgoing.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        log::debug!(
            "{} {} -> {} ({} bytes)",
            request.method(),
            request.url(),
            status,
            body.len()
        );
        Ok(Response::new(status, headers, body))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockFetcher;
    use super::*;

    #[test]
    fn http_fetcher_builds_with_timeout() {
        let config = NetworkConfig {
            timeout_secs: Some(5),
            ..NetworkConfig::default()
        };
        assert!(HttpFetcher::new(&config).is_ok());
    }

    #[test]
    fn fetchers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpFetcher>();
        assert_send_sync::<MockFetcher>();
    }

    #[tokio::test]
    async fn http_fetcher_reports_connection_failure() {
        let fetcher = HttpFetcher::new(&NetworkConfig::default()).unwrap();
        // Port 9 (discard) on localhost is almost never listening.
        let req = Request::get("http://127.0.0.1:9/a.css").unwrap();
        let err = fetcher.fetch(&req).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn mock_counts_calls() {
        let fetcher = MockFetcher::new();
        fetcher.serve_body("http://localhost/a", "a");
        let req = Request::get("http://localhost/a").unwrap();
        assert!(fetcher.fetch(&req).await.is_ok());
        fetcher.set_offline(true);
        assert!(fetcher.fetch(&req).await.is_err());
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(fetcher.calls_for("http://localhost/a"), 2);
    }
}
