//! Health check and metrics endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::metrics::{encode_metrics, set_backend_healthy, sync_batch_metrics};
use crate::state::AppState;

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.upstream.health_check().await;
    set_backend_healthy(result.is_ok());

    match result {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "upstream": "connected",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "upstream": "disconnected",
                "error": e.to_string(),
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
    }
}

/// Metrics endpoint with forwarding and batch statistics
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.stats.lock().await;
    let batch = state.batch_metrics.snapshot();
    let config = &state.batch_config;

    Json(json!({
        "proxy": {
            "port": state.config.port,
            "verbose": state.config.verbose,
            "upstream_url": state.upstream.base_url(),
            "requests_total": stats.requests_total,
            "requests_success": stats.requests_success,
            "requests_failed": stats.requests_failed,
            "success_rate": stats.success_rate(),
            "avg_forward_ms": stats.avg_forward_ms()
        },
        "batch": {
            "config": {
                "method": config.method.as_str(),
                "path": config.path,
                "max_body_bytes": config.max_body_bytes,
                "include_duration": config.include_duration,
                "default_scheme": config.default_scheme,
                "protocol": format!("{:?}", config.protocol)
            },
            "totals": batch
        }
    }))
}

/// Prometheus text exposition
///
/// GET /metrics/prometheus
pub async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    sync_batch_metrics(&state.batch_metrics.snapshot());

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        encode_metrics(),
    )
}

/// Ready check (for Kubernetes)
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.upstream.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
