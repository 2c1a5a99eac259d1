//! Forwarding to the upstream service.
//!
//! Every request the local router does not serve, including batch
//! sub-requests, is replayed against the upstream with the same method,
//! path, query, headers and body. The upstream answer is handed back
//! whole.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, HeaderName, Request, Response},
};
use reqwest::Client;
use tracing::{debug, error, info, instrument};

use crate::error::ProxyError;

/// Largest inbound body replayed upstream
pub const MAX_FORWARD_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

/// Upstream client
#[derive(Clone)]
pub struct UpstreamProxy {
    /// HTTP client
    client: Client,
    /// Upstream base URL
    base_url: String,
}

impl UpstreamProxy {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProxyError> {
        let base_url = base_url.into();
        info!(url = %base_url, "Creating upstream proxy");

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Get the upstream base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute upstream URL for an origin-form target
    pub fn url_for(&self, path_and_query: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{base}{path_and_query}")
        } else {
            format!("{base}/{path_and_query}")
        }
    }

    /// Check if the upstream answers on `/`
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), ProxyError> {
        let url = self.url_for("/");
        debug!(url = %url, "Checking upstream health");

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Upstream returned error");
                Err(ProxyError::Upstream(format!("upstream returned status {}: {}", status, body)))
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to upstream");
                Err(ProxyError::UpstreamConnection(e.to_string()))
            }
        }
    }

    /// Replay a request upstream and return its response
    #[instrument(skip(self, request), fields(method = %request.method(), uri = %request.uri()))]
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();
        let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = self.url_for(target);

        let body = to_bytes(body, MAX_FORWARD_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let mut headers = strip_hop_by_hop(parts.headers);
        headers.remove(header::HOST);

        debug!(url = %url, bytes = body.len(), "Forwarding request");

        let response = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProxyError::UpstreamConnection(e.to_string())
                } else {
                    ProxyError::Http(e)
                }
            })?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers().clone());
        let bytes = response.bytes().await?;
        debug!(status = %status, bytes = bytes.len(), "Upstream answered");

        let mut forwarded = Response::new(Body::from(bytes));
        *forwarded.status_mut() = status;
        *forwarded.headers_mut() = headers;
        Ok(forwarded)
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn test_proxy_creation() {
        let proxy = UpstreamProxy::new("http://localhost:8080").unwrap();
        assert_eq!(proxy.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_url_for() {
        let proxy = UpstreamProxy::new("http://192.168.1.100:8080/").unwrap();
        assert_eq!(proxy.url_for("/api/a?b=1"), "http://192.168.1.100:8080/api/a?b=1");
        assert_eq!(proxy.url_for("api/a"), "http://192.168.1.100:8080/api/a");
        assert_eq!(proxy.url_for("/"), "http://192.168.1.100:8080/");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-request-id", HeaderValue::from_static("42"));

        let headers = strip_hop_by_hop(headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-request-id"], "42");
    }

    #[tokio::test]
    async fn test_forward_to_unreachable_upstream() {
        // Port 1 is reserved and nothing listens there
        let proxy = UpstreamProxy::new("http://127.0.0.1:1").unwrap();
        let request = Request::builder().uri("/anything").body(Body::empty()).unwrap();

        let err = proxy.forward(request).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnection(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
