//! Tower middleware that serves batch envelopes in front of a service.
//!
//! ```text
//! request ──► BatchGate ──(no)──► inner service ──► response, untouched
//!                 │
//!               (yes)
//!                 ▼
//!   read body → EnvelopeCodec::decode → Dispatcher::dispatch → EnvelopeCodec::encode
//!                                                                      │
//!                                                      200 + JSON array ◄┘
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    body::{to_bytes, Body, HttpBody},
    http::{Request, Response},
    response::IntoResponse,
    BoxError,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{info, instrument, warn};

use crate::config::BatchConfig;
use crate::dispatcher::Dispatcher;
use crate::envelope::EnvelopeCodec;
use crate::error::BatchError;
use crate::gate::BatchGate;
use crate::materialize::Origin;
use crate::metrics::BatchMetrics;

/// Layer that adds batch handling to a service.
#[derive(Debug, Clone)]
pub struct BatchLayer {
    config: Arc<BatchConfig>,
    gate: BatchGate,
    metrics: Arc<BatchMetrics>,
}

impl BatchLayer {
    /// Batch endpoint at `config.method` + `config.path`.
    pub fn new(config: BatchConfig) -> Self {
        let gate = BatchGate::from(&config);
        Self { config: Arc::new(config), gate, metrics: Arc::new(BatchMetrics::new()) }
    }

    /// Replace the gate derived from the config.
    pub fn with_gate(mut self, gate: BatchGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<BatchMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl Default for BatchLayer {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

impl<S> Layer<S> for BatchLayer {
    type Service = BatchService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BatchService {
            inner,
            config: Arc::clone(&self.config),
            gate: self.gate.clone(),
            codec: EnvelopeCodec::new(self.config.protocol),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Service produced by [`BatchLayer`].
#[derive(Debug, Clone)]
pub struct BatchService<S> {
    inner: S,
    config: Arc<BatchConfig>,
    gate: BatchGate,
    codec: EnvelopeCodec,
    metrics: Arc<BatchMetrics>,
}

impl<S, B> Service<Request<Body>> for BatchService<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send + 'static,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Use the service that was driven to readiness; leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if !self.gate.matches(&request) {
            self.metrics.record_passthrough();
            return Box::pin(async move {
                let response = inner.call(request).await?;
                Ok(response.map(Body::new))
            });
        }

        let dispatcher = Dispatcher::new(inner)
            .with_metrics(Arc::clone(&self.metrics))
            .include_duration(self.config.include_duration);
        let config = Arc::clone(&self.config);
        let codec = self.codec;
        let metrics = Arc::clone(&self.metrics);

        Box::pin(async move {
            let response = serve_batch(request, &config, codec, dispatcher, &metrics)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, status = %e.status(), "Batch request failed");
                    e.into_response()
                });
            Ok(response)
        })
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn serve_batch<S, B>(
    request: Request<Body>,
    config: &BatchConfig,
    codec: EnvelopeCodec,
    dispatcher: Dispatcher<S>,
    metrics: &BatchMetrics,
) -> Result<Response<Body>, BatchError>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    metrics.record_received();

    let origin = Origin::from_request(&request, &config.default_scheme);
    let method = request.method().clone();

    let bytes = to_bytes(request.into_body(), config.max_body_bytes)
        .await
        .map_err(|e| {
            metrics.record_rejected();
            BatchError::BodyRead(e.to_string())
        })?;

    let descriptors = codec.decode(&bytes, &method).map_err(|e| {
        metrics.record_rejected();
        BatchError::from(e)
    })?;
    let size = descriptors.len();

    let pending = dispatcher.dispatch(&origin, descriptors);
    let items = pending.await;
    let payload = codec.encode(&items).map_err(BatchError::Encode)?;

    let elapsed = started.elapsed();
    metrics.record_completed(elapsed);
    info!(size, elapsed_ms = elapsed.as_millis() as u64, "Batch complete");

    Ok(Response::new(Body::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new().route("/a", get(|| async { "A" }))
    }

    fn batch_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("http://localhost/api/batch")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_batch_roundtrip() {
        let service = BatchLayer::default().layer(app());
        let response = service
            .oneshot(batch_request(r#"[{"method":"GET","path":"/a"}]"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
        assert_eq!(
            body_string(response).await,
            r#"[{"method":"GET","path":"/a","status":200,"headers":{"Content-Type":["text/plain; charset=utf-8"]},"body":"A"}]"#
        );
    }

    #[tokio::test]
    async fn test_body_too_large_is_server_error() {
        let config = BatchConfig { max_body_bytes: 8, ..BatchConfig::default() };
        let metrics = Arc::new(BatchMetrics::new());
        let service = BatchLayer::new(config).with_metrics(Arc::clone(&metrics)).layer(app());

        let response = service
            .oneshot(batch_request(r#"[{"method":"GET","path":"/a"}]"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(metrics.snapshot().batches_rejected, 1);
    }

    #[tokio::test]
    async fn test_custom_gate() {
        let layer = BatchLayer::default()
            .with_gate(BatchGate::predicate(|req| req.uri().path() == "/api/compose"));
        let service = layer.layer(app());

        let request = Request::builder()
            .method("PUT")
            .uri("/api/compose")
            .body(Body::from(r#"[{"method":"GET","path":"/a"}]"#))
            .unwrap();
        let response = service.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.starts_with(r#"[{"method":"GET","path":"/a","status":200"#));

        // Default path is no longer special
        let response = service.oneshot(batch_request("[]")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_shared_with_layer() {
        let layer = BatchLayer::default();
        let metrics = layer.metrics();
        let service = layer.layer(app());

        let request = Request::builder().uri("/a").body(Body::empty()).unwrap();
        service.clone().oneshot(request).await.unwrap();
        service.oneshot(batch_request("[]")).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.passthrough_requests, 1);
        assert_eq!(snapshot.batches_completed, 1);
    }
}
