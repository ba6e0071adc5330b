//! # Reverse-Proxy Fallback
//!
//! Every request that matches no registered route is relayed unmodified to the single
//! configured upstream. When the upstream answers 404 or 301 and a custom error page is
//! configured, the page is fetched within a short budget and returned instead of the
//! upstream response. If fetching the page fails or times out, or the page itself is
//! not a success response, the upstream response is returned as is.

use super::upstream::{UpstreamClient, UpstreamResponse};
use crate::core::config::FallbackConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::record_proxy_request;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct FallbackProxy {
    upstream: Option<String>,
    error_page_url: Option<String>,
    error_page_timeout: Duration,
    client: UpstreamClient,
}

impl FallbackProxy {
    pub fn new(config: &FallbackConfig, client: UpstreamClient) -> Self {
        Self {
            upstream: config
                .upstream
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            error_page_url: config.error_page_url.clone(),
            error_page_timeout: config.error_page_timeout,
            client,
        }
    }

    pub fn upstream(&self) -> Option<&str> {
        self.upstream.as_deref()
    }

    /// Relay a request to the fallback upstream
    #[instrument(skip(self, headers, body), fields(upstream = ?self.upstream))]
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let Some(upstream) = self.upstream.as_deref() else {
            record_proxy_request("fallback", "backend_unreachable");
            return Err(GatewayError::backend_unreachable(
                "fallback",
                "no fallback upstream configured",
            ));
        };

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = format!("{}{}", upstream, path_and_query);

        let response = match self.client.send(upstream, method, &url, headers, body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Fallback upstream request failed");
                record_proxy_request("fallback", e.error_type());
                return Err(e);
            }
        };
        record_proxy_request("fallback", "success");

        if matches!(response.status, StatusCode::NOT_FOUND | StatusCode::MOVED_PERMANENTLY) {
            if let Some(page_url) = self.error_page_url.as_deref() {
                if let Some(page) = self.fetch_error_page(page_url).await {
                    debug!(original = %response.status, "Substituted custom error page");
                    return Ok(page.into_response());
                }
            }
        }

        Ok(response.into_response())
    }

    async fn fetch_error_page(&self, page_url: &str) -> Option<UpstreamResponse> {
        let no_headers = HeaderMap::new();
        let fetch = self
            .client
            .send("error_page", Method::GET, page_url, &no_headers, Bytes::new());

        match tokio::time::timeout(self.error_page_timeout, fetch).await {
            Ok(Ok(page)) if page.status.is_success() => Some(page),
            Ok(Ok(page)) => {
                warn!(status = %page.status, "Custom error page returned an error status");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to fetch custom error page");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.error_page_timeout, "Custom error page fetch timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_upstream_is_backend_unreachable() {
        let proxy = FallbackProxy::new(
            &FallbackConfig::default(),
            UpstreamClient::new(Duration::from_secs(1)).unwrap(),
        );
        let err = proxy
            .forward(Method::GET, &Uri::from_static("/anything"), &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "backend_unreachable");
    }

    #[test]
    fn test_upstream_trailing_slash_trimmed() {
        let config = FallbackConfig {
            upstream: Some("http://orchestrator:8080/".to_string()),
            ..FallbackConfig::default()
        };
        let proxy = FallbackProxy::new(&config, UpstreamClient::new(Duration::from_secs(1)).unwrap());
        assert_eq!(proxy.upstream(), Some("http://orchestrator:8080"));
    }
}
