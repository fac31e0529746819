//! Admission filter: counts requests per client IP before handlers run.
//!
//! The filter never rejects a request for being over the limit. It attaches
//! [`RemoteIp`] and [`HitsPerIpLimit`] to the request extensions and lets the
//! handler decide whether to block, ask for a captcha or just warn.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use crate::config::{FailMode, ServerConfig};
use crate::counter::IpCounter;

/// Used when neither the proxy header nor the connection tells us the address.
pub const LOCALHOST_IPV6: &str = "::1";

/// Spellings of the loopback address a front proxy may forward.
const LOCALHOSTS: &[&str] = &[
    "127.0.0.1",
    "::1",
    "localhost",
    "::1/128",
    "0000:0000:0000:0000:0000:0000:0000:0001",
    "0:0:0:0:0:0:0:1",
];

/// Client address resolved by the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIp(pub String);

/// Result of the per-IP check for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitsPerIpLimit {
    /// The client reached the IP counter's limit in this window
    pub exceeded: bool,
}

/// Shared state of the [`hits_per_ip`] middleware.
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    ip_counter: IpCounter,
    proxy_ip_header: String,
    fail_mode: FailMode,
}

impl AdmissionFilter {
    /// Create a filter over the given IP counter.
    pub fn new(ip_counter: IpCounter, proxy_ip_header: impl Into<String>, fail_mode: FailMode) -> Self {
        Self {
            ip_counter,
            proxy_ip_header: proxy_ip_header.into(),
            fail_mode,
        }
    }

    /// Create a filter using the proxy header and fail mode from server settings.
    pub fn from_config(ip_counter: IpCounter, config: &ServerConfig) -> Self {
        Self::new(ip_counter, config.proxy_ip_header.clone(), config.fail_mode)
    }
}

/// Resolve the client address of a request.
///
/// The proxy header wins unless it is missing, empty or names the loopback
/// interface, in which case the connection's peer address is used. Padding
/// around the header value is ignored.
pub fn client_ip(headers: &HeaderMap, remote: Option<IpAddr>, proxy_ip_header: &str) -> String {
    let forwarded = headers
        .get(proxy_ip_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && !LOCALHOSTS.iter().any(|local| local == value));

    match (forwarded, remote) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.to_string(),
        (None, None) => LOCALHOST_IPV6.to_string(),
    }
}

/// Middleware counting every request against the client's IP.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn hits_per_ip(
    State(filter): State<AdmissionFilter>,
    mut request: Request,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(request.headers(), remote, &filter.proxy_ip_header);

    debug!(
        ip = %ip,
        method = %request.method(),
        path = %request.uri().path(),
        "Admitting request"
    );

    let exceeded = match filter.ip_counter.increment_and_check(&ip).await {
        Ok(exceeded) => exceeded,
        Err(err) => match filter.fail_mode {
            FailMode::Closed => {
                error!(ip = %ip, error = %err, "IP counter unavailable, rejecting request");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            FailMode::Open => {
                warn!(ip = %ip, error = %err, "IP counter unavailable, admitting request unchecked");
                false
            }
        },
    };

    if exceeded {
        warn!(ip = %ip, "Hits per IP limit exceeded");
    }

    request.extensions_mut().insert(RemoteIp(ip));
    request.extensions_mut().insert(HitsPerIpLimit { exceeded });
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CounterCache, InMemoryCache};
    use crate::error::{CounterError, Result};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::HeaderValue;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct DownCache;

    #[async_trait]
    impl CounterCache for DownCache {
        async fn get(&self, _key: &str) -> Result<Option<u64>> {
            Err(CounterError::Backend("timed out".to_string()))
        }

        async fn create_if_absent(&self, _key: &str, _initial: u64, _ttl: Duration) -> Result<bool> {
            Err(CounterError::Backend("timed out".to_string()))
        }

        async fn atomic_increment(&self, _key: &str) -> Result<Option<u64>> {
            Err(CounterError::Backend("timed out".to_string()))
        }
    }

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    async fn echo(
        Extension(RemoteIp(ip)): Extension<RemoteIp>,
        Extension(limit): Extension<HitsPerIpLimit>,
    ) -> String {
        format!("{ip} {}", limit.exceeded)
    }

    fn app(cache: Arc<dyn CounterCache>, fail_mode: FailMode) -> Router {
        let filter = AdmissionFilter::new(
            IpCounter::with_defaults(cache).unwrap(),
            "X-Real-IP",
            fail_mode,
        );
        Router::new()
            .route("/", get(echo))
            .layer(middleware::from_fn_with_state(filter, hits_per_ip))
    }

    fn request_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/")
            .header("X-Real-IP", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_client_ip_prefers_proxy_header() {
        let remote: IpAddr = "10.0.0.2".parse().unwrap();
        let ip = client_ip(&headers("x-real-ip", "203.0.113.9"), Some(remote), "X-Real-IP");
        assert_eq!(ip, "203.0.113.9");
    }

    #[test]
    fn test_client_ip_ignores_loopback_header() {
        let remote: IpAddr = "10.0.0.2".parse().unwrap();
        for loopback in ["127.0.0.1", "::1", "localhost", "0:0:0:0:0:0:0:1"] {
            let mut map = HeaderMap::new();
            map.insert("x-real-ip", HeaderValue::from_str(loopback).unwrap());
            assert_eq!(client_ip(&map, Some(remote), "X-Real-IP"), "10.0.0.2");
        }
    }

    #[test]
    fn test_client_ip_ignores_empty_header() {
        let remote: IpAddr = "192.0.2.1".parse().unwrap();
        let ip = client_ip(&headers("x-real-ip", "  "), Some(remote), "X-Real-IP");
        assert_eq!(ip, "192.0.2.1");
    }

    #[test]
    fn test_client_ip_trims_padded_header() {
        let remote: IpAddr = "192.0.2.1".parse().unwrap();
        let ip = client_ip(&headers("x-real-ip", " 203.0.113.9 "), Some(remote), "X-Real-IP");
        assert_eq!(ip, "203.0.113.9");
        let ip = client_ip(&headers("x-real-ip", " 127.0.0.1 "), Some(remote), "X-Real-IP");
        assert_eq!(ip, "192.0.2.1");
    }

    #[test]
    fn test_client_ip_custom_header() {
        let ip = client_ip(&headers("x-client-address", "198.51.100.4"), None, "X-Client-Address");
        assert_eq!(ip, "198.51.100.4");
    }

    #[test]
    fn test_client_ip_unknown_falls_back_to_localhost() {
        assert_eq!(client_ip(&HeaderMap::new(), None, "X-Real-IP"), LOCALHOST_IPV6);
    }

    #[tokio::test]
    async fn test_flags_request_once_limit_reached() {
        let app = app(Arc::new(InMemoryCache::new()), FailMode::Closed);

        let mut bodies = Vec::new();
        for _ in 0..6 {
            let response = app.clone().oneshot(request_from("9.9.9.9")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            bodies.push(body_text(response).await);
        }

        assert_eq!(bodies[0], "9.9.9.9 false");
        assert_eq!(bodies[3], "9.9.9.9 false");
        assert_eq!(bodies[4], "9.9.9.9 true");
        assert_eq!(bodies[5], "9.9.9.9 true");
    }

    #[tokio::test]
    async fn test_addresses_are_counted_separately() {
        let app = app(Arc::new(InMemoryCache::new()), FailMode::Closed);

        for _ in 0..5 {
            app.clone().oneshot(request_from("9.9.9.9")).await.unwrap();
        }
        let response = app.oneshot(request_from("8.8.8.8")).await.unwrap();
        assert_eq!(body_text(response).await, "8.8.8.8 false");
    }

    #[tokio::test]
    async fn test_fail_closed_rejects_on_cache_failure() {
        let app = app(Arc::new(DownCache), FailMode::Closed);
        let response = app.oneshot(request_from("9.9.9.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_fail_open_admits_on_cache_failure() {
        let app = app(Arc::new(DownCache), FailMode::Open);
        let response = app.oneshot(request_from("9.9.9.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "9.9.9.9 false");
    }
}
