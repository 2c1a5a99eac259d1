//! Error types for the reqbatch proxy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Proxy error types
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Failed to connect to the upstream service
    #[error("Failed to connect to upstream: {0}")]
    UpstreamConnection(String),

    /// Upstream answered, but not successfully
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Inbound request could not be forwarded as-is
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamConnection(_) | ProxyError::Upstream(_) | ProxyError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": format!("{:?}", self).split('(').next().unwrap_or("Unknown"),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::UpstreamConnection("refused".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::Upstream("boom".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::InvalidRequest("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::Internal("oops".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = ProxyError::UpstreamConnection("refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "UpstreamConnection");
        assert_eq!(body["error"]["message"], "Failed to connect to upstream: refused");
    }
}
