//! Fallback route: anything the proxy does not serve itself goes upstream.

use std::sync::Arc;

use axum::{extract::Request, extract::State, response::Response};
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::metrics::UpstreamTimer;
use crate::state::AppState;

/// Forward to the upstream service
///
/// * (fallback)
pub async fn forward(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ProxyError> {
    debug!(method = %request.method(), uri = %request.uri(), "Forwarding to upstream");

    let timer = UpstreamTimer::new(request.method().as_str());
    let start = std::time::Instant::now();
    let result = state.upstream.forward(request).await;

    let mut stats = state.stats.lock().await;
    stats.requests_total += 1;

    match result {
        Ok(response) => {
            stats.requests_success += 1;
            stats.forward_time_ms += start.elapsed().as_millis() as u64;
            timer.record_response(response.status().as_u16());
            Ok(response)
        }
        Err(e) => {
            stats.requests_failed += 1;
            timer.record_failure();
            warn!(error = %e, "Upstream request failed");
            Err(e)
        }
    }
}
