//! Backend proxy calls.
//!
//! Requests are relayed with their method, headers and body; hop-by-hop headers are
//! stripped in both directions. The client's `Host` is not forwarded: the backend sees
//! its own authority, taken from the target URL. Each call is bounded by the configured
//! proxy timeout and never retried.

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::record_proxy_request;
use crate::routing::remapper::Remapped;
use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers meaningful only for a single transport hop (RFC 7230 section 6.1)
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy `headers` without hop-by-hop entries
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Headers relayed to an upstream: hop-by-hop entries and `host` removed, the latter
/// being set from the target URL by the HTTP client
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut outbound = strip_hop_by_hop(headers);
    outbound.remove(HOST);
    outbound
}

/// A fully buffered upstream response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = strip_hop_by_hop(&self.headers);
        response
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    /// Build a client whose calls time out after `timeout`.
    ///
    /// Redirects are not followed so that callers see upstream 3xx responses.
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one request and buffer the response.
    ///
    /// Dial, timeout and body errors become [`GatewayError::BackendUnreachable`]
    /// naming `target`.
    pub async fn send(
        &self,
        target: &str,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResult<UpstreamResponse> {
        debug!(%method, url, "Sending upstream request");

        let response = self
            .client
            .request(method, url)
            .headers(outbound_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::backend_unreachable(target, e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::backend_unreachable(target, e.to_string()))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    /// Forward a request to the backend resolved by the remapper
    pub async fn forward(
        &self,
        remapped: &Remapped,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let backend = remapped.backend.to_string();
        let url = format!("{}{}", remapped.backend.base_url(), remapped.service_uri);

        match self.send(&backend, method, &url, headers, body).await {
            Ok(response) => {
                record_proxy_request("backend", "success");
                Ok(response.into_response())
            }
            Err(e) => {
                warn!(backend = %backend, error = %e, "Backend request failed");
                record_proxy_request("backend", e.error_type());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("host", HeaderValue::from_static("gateway"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("x-tenant", HeaderValue::from_static("acme"));

        let stripped = strip_hop_by_hop(&headers);
        assert_eq!(stripped.len(), 3);
        assert!(stripped.contains_key("host"));
        assert!(stripped.contains_key("authorization"));
        assert!(stripped.contains_key("x-tenant"));

        let outbound = outbound_headers(&headers);
        assert_eq!(outbound.len(), 2);
        assert!(!outbound.contains_key("host"));
    }

    #[tokio::test]
    async fn test_backend_sees_its_own_host() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources"))
            .and(header("host", backend.address().to_string().as_str()))
            .and(header("x-tenant", "acme"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&backend)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("gateway.example.com"));
        headers.insert("x-tenant", HeaderValue::from_static("acme"));

        let client = UpstreamClient::new(Duration::from_secs(5)).unwrap();
        let url = format!("{}/v1/resources", backend.uri());
        let response = client
            .send("resource-svc", Method::GET, &url, &headers, Bytes::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[test]
    fn test_into_response_keeps_status_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("connection", HeaderValue::from_static("close"));

        let response = UpstreamResponse {
            status: StatusCode::CREATED,
            headers,
            body: Bytes::from_static(b"done"),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["content-type"], "text/plain");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_reported() {
        let client = UpstreamClient::new(Duration::from_millis(500)).unwrap();
        let err = client
            .send("nowhere:1", Method::GET, "http://127.0.0.1:1/", &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "backend_unreachable");
    }
}
