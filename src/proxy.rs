//! HTTP proxy host that feeds intercepted requests to a [`CacheWorker`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request as HttpRequest, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::request::{Request, parse_url};
use crate::stats::StatsSnapshot;
use crate::strategy::Resolution;
use crate::worker::{CacheWorker, WorkerState};

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-precache";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
struct AppState {
    worker: Arc<CacheWorker>,
    max_body_bytes: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    state: WorkerState,
    origin: String,
}

#[derive(Serialize)]
struct CacheInfo {
    name: String,
    entries: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: String) -> HttpResponse {
    (status, axum::Json(ErrorResponse { error: message })).into_response()
}

async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        state: state.worker.state(),
        origin: state.worker.origin().to_string(),
    })
}

async fn api_stats(State(state): State<AppState>) -> axum::Json<StatsSnapshot> {
    axum::Json(state.worker.stats().snapshot())
}

async fn api_caches(State(state): State<AppState>) -> HttpResponse {
    match state.worker.cache_summary().await {
        Ok(summary) => axum::Json(
            summary
                .into_iter()
                .map(|(name, entries)| CacheInfo { name, entries })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copies end-to-end request headers.
///
/// `Host` is dropped so the fetcher sets the one matching the target URL.
/// `Accept-Encoding` is dropped too: it is transport negotiation, not part
/// of the request's cache identity, and the fetcher does not decode bodies,
/// so upstream responses must arrive unencoded.
fn forwarded_request_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|&(name, _)| {
            !is_hop_by_hop(name) && *name != header::HOST && *name != header::ACCEPT_ENCODING
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Builds the intercepted request.
///
/// Absolute-form targets (`GET http://cdn/lib.js`) keep their URL;
/// origin-form targets (`GET /a.css`) resolve against the worker origin.
fn intercepted_request(worker: &CacheWorker, parts: &axum::http::request::Parts) -> Result<Request> {
    let url = if parts.uri.scheme().is_some() {
        parse_url(&parts.uri.to_string())?
    } else {
        let target = parts
            .uri
            .path_and_query()
            .map_or("/", axum::http::uri::PathAndQuery::as_str);
        worker.origin_url().join(target).map_err(|e| Error::InvalidUrl {
            url: target.to_string(),
            reason: e.to_string(),
        })?
    };
    Ok(Request::new(parts.method.clone(), url).with_headers(forwarded_request_headers(&parts.headers)))
}

/// Replays a resolution as an HTTP response.
fn into_http(resolution: Resolution) -> HttpResponse {
    let source = resolution.source();
    let Some(response) = resolution.into_response() else {
        return error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "no network response and nothing cached".to_string(),
        );
    };

    let (status, headers, body) = response.into_parts();
    let mut out = HttpResponse::new(Body::from(body));
    *out.status_mut() = status;
    let out_headers = out.headers_mut();
    for (name, value) in &headers {
        if !is_hop_by_hop(name) && *name != header::CONTENT_LENGTH {
            out_headers.append(name.clone(), value.clone());
        }
    }
    out_headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source),
    );
    out
}

async fn intercept(State(state): State<AppState>, req: HttpRequest) -> HttpResponse {
    let (parts, body) = req.into_parts();
    if parts.method == Method::CONNECT {
        return error_response(
            StatusCode::NOT_IMPLEMENTED,
            format!("CONNECT {} is not supported; use plain HTTP proxying", parts.uri),
        );
    }
    let request = match intercepted_request(&state.worker, &parts) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
    };
    let request = request.with_body(body);

    match state.worker.handle_fetch(&request).await {
        Ok(resolution) => into_http(resolution),
        Err(e) if e.is_network() => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Builds the proxy router: admin endpoints under `/_precache/`, every other
/// request intercepted by `worker`.
pub fn router(worker: Arc<CacheWorker>, max_body_bytes: usize) -> Router {
    let state = AppState {
        worker,
        max_body_bytes,
    };
    Router::new()
        .route("/_precache/health", get(api_health))
        .route("/_precache/stats", get(api_stats))
        .route("/_precache/caches", get(api_caches))
        .fallback(intercept)
        .with_state(state)
}

/// Binds `host:port` and serves until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve(
    worker: Arc<CacheWorker>,
    host: &str,
    port: u16,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("listen address {host}:{port}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, worker, max_body_bytes, shutdown).await
}

/// Serves on an already bound listener until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    worker: Arc<CacheWorker>,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    log::info!(
        "Proxy listening on {} for origin {}",
        listener.local_addr()?,
        worker.origin()
    );
    let app = router(worker, max_body_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Proxy stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::network::Fetcher;
    use crate::network::mock::MockFetcher;
    use crate::response::Response;
    use crate::store::{CacheStorage, MemoryStorage};

    struct Running {
        addr: SocketAddr,
        fetcher: Arc<MockFetcher>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start() -> Running {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve(
            "http://localhost:9000/a.css",
            Response::ok("a{}")
                .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/css"))
                .with_header(header::VARY, HeaderValue::from_static("Accept-Encoding")),
        );
        fetcher.serve_body("http://localhost:9000/b.js", "b()");
        let config = CacheConfig::new()
            .with_origin("http://localhost:9000")
            .with_manifest(["/a.css", "/b.js"]);
        let worker = CacheWorker::new(
            config,
            Arc::new(MemoryStorage::new()) as Arc<dyn CacheStorage>,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        )
        .unwrap();
        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve_on(
            listener,
            Arc::new(worker),
            1024 * 1024,
            shutdown.clone(),
        ));
        Running {
            addr,
            fetcher,
            shutdown,
            handle,
        }
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn same_origin_path_is_served_from_cache() {
        let running = start().await;
        let calls = running.fetcher.calls();

        let resp = client()
            .get(format!("http://{}/a.css", running.addr))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()[SOURCE_HEADER], "static");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css");
        assert_eq!(resp.text().await.unwrap(), "a{}");
        assert_eq!(running.fetcher.calls(), calls);
        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn accept_encoding_does_not_defeat_precache() {
        let running = start().await;
        let calls = running.fetcher.calls();

        let resp = client()
            .get(format!("http://{}/a.css", running.addr))
            .header(header::ACCEPT_ENCODING, "gzip, br")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.headers()[SOURCE_HEADER], "static");
        assert_eq!(resp.text().await.unwrap(), "a{}");
        assert_eq!(running.fetcher.calls(), calls);
        running.shutdown.cancel();
    }

    #[tokio::test]
    async fn connect_is_rejected_without_fetching() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let running = start().await;
        let calls = running.fetcher.calls();
        let mut stream = tokio::net::TcpStream::connect(running.addr).await.unwrap();
        stream
            .write_all(b"CONNECT cdn.example.com:443 HTTP/1.1\r\nHost: cdn.example.com:443\r\n\r\n")
            .await
            .unwrap();

        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]);

        assert!(reply.starts_with("HTTP/1.1 501"), "{reply}");
        assert_eq!(running.fetcher.calls(), calls);
        running.shutdown.cancel();
    }

    #[tokio::test]
    async fn absolute_form_request_is_network_first() {
        let running = start().await;
        running
            .fetcher
            .serve_body("http://cdn.example.com/lib.js", "lib");
        let proxied = reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{}", running.addr)).unwrap())
            .build()
            .unwrap();

        let resp = proxied.get("http://cdn.example.com/lib.js").send().await.unwrap();
        assert_eq!(resp.headers()[SOURCE_HEADER], "network");
        assert_eq!(resp.text().await.unwrap(), "lib");

        running.fetcher.set_offline(true);
        let resp = proxied.get("http://cdn.example.com/lib.js").send().await.unwrap();
        assert_eq!(resp.headers()[SOURCE_HEADER], "dynamic");

        let resp = proxied.get("http://cdn.example.com/other.js").send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
        running.shutdown.cancel();
    }

    #[tokio::test]
    async fn same_origin_miss_offline_is_bad_gateway() {
        let running = start().await;
        running.fetcher.set_offline(true);

        let resp = client()
            .get(format!("http://{}/missing.png", running.addr))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        running.shutdown.cancel();
    }

    #[tokio::test]
    async fn admin_endpoints_report_state() {
        let running = start().await;
        let base = format!("http://{}/_precache", running.addr);

        let health: serde_json::Value = client()
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["state"], "activated");
        assert_eq!(health["origin"], "http://localhost:9000");

        client().get(format!("http://{}/a.css", running.addr)).send().await.unwrap();
        let stats: serde_json::Value = client()
            .get(format!("{base}/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["static_hits"], 1);

        let caches: serde_json::Value = client()
            .get(format!("{base}/caches"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(caches[0]["name"], "precache-static-v1");
        assert_eq!(caches[0]["entries"], 2);
        running.shutdown.cancel();
    }

    #[test]
    fn connection_and_encoding_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy:9080"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/css"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let forwarded = forwarded_request_headers(&headers);

        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[header::ACCEPT], "text/css");
    }

    #[test]
    fn unavailable_maps_to_gateway_timeout() {
        let resp = into_http(Resolution::Unavailable);
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
