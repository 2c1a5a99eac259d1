//! Prometheus metrics for the reqbatch proxy
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use reqbatch_core::MetricsSnapshot;

lazy_static! {
    /// Global Prometheus registry for reqbatch metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Upstream Metrics ==============

    /// Forwarded requests counter with method and status labels
    pub static ref UPSTREAM_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("upstream_requests_total", "Total number of requests forwarded upstream")
            .namespace("reqbatch"),
        &["method", "status"]
    ).expect("metric can be created");

    /// Upstream round trip histogram with method label
    pub static ref UPSTREAM_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "upstream_request_duration_seconds",
            "Upstream round trip in seconds"
        )
        .namespace("reqbatch")
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method"]
    ).expect("metric can be created");

    /// Requests currently waiting on the upstream
    pub static ref ACTIVE_UPSTREAM_REQUESTS: Gauge = Gauge::with_opts(
        Opts::new("active_upstream_requests", "Number of requests currently waiting on the upstream")
            .namespace("reqbatch")
    ).expect("metric can be created");

    // ============== Backend Metrics ==============

    /// Upstream health status (1 = healthy, 0 = unhealthy)
    pub static ref BACKEND_HEALTHY: Gauge = Gauge::with_opts(
        Opts::new("backend_healthy", "Backend health status (1=healthy, 0=unhealthy)")
            .namespace("reqbatch")
    ).expect("metric can be created");

    // ============== Batch Metrics ==============

    /// Batch envelopes by outcome (received, completed, rejected)
    pub static ref BATCHES: GaugeVec = GaugeVec::new(
        Opts::new("batches", "Batch envelopes seen by the batch layer")
            .namespace("reqbatch"),
        &["outcome"]
    ).expect("metric can be created");

    /// Sub-requests by outcome (dispatched, failed)
    pub static ref SUB_REQUESTS: GaugeVec = GaugeVec::new(
        Opts::new("sub_requests", "Sub-requests fanned out by the batch layer")
            .namespace("reqbatch"),
        &["outcome"]
    ).expect("metric can be created");

    /// Requests the batch layer let through untouched
    pub static ref PASSTHROUGH_REQUESTS: Gauge = Gauge::with_opts(
        Opts::new("passthrough_requests", "Requests forwarded untouched by the batch layer")
            .namespace("reqbatch")
    ).expect("metric can be created");

    /// Downstream panics caught inside a batch
    pub static ref DOWNSTREAM_PANICS: Gauge = Gauge::with_opts(
        Opts::new("downstream_panics", "Downstream handler panics caught inside a batch")
            .namespace("reqbatch")
    ).expect("metric can be created");

    /// Largest batch observed
    pub static ref MAX_BATCH_SIZE: Gauge = Gauge::with_opts(
        Opts::new("max_batch_size", "Largest batch observed")
            .namespace("reqbatch")
    ).expect("metric can be created");

    /// Average batch wall time
    pub static ref AVG_BATCH_MS: Gauge = Gauge::with_opts(
        Opts::new("avg_batch_ms", "Average batch wall time in milliseconds")
            .namespace("reqbatch")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    // Upstream metrics
    REGISTRY.register(Box::new(UPSTREAM_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_UPSTREAM_REQUESTS.clone()))?;

    // Backend metrics
    REGISTRY.register(Box::new(BACKEND_HEALTHY.clone()))?;

    // Batch metrics
    REGISTRY.register(Box::new(BATCHES.clone()))?;
    REGISTRY.register(Box::new(SUB_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(PASSTHROUGH_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(DOWNSTREAM_PANICS.clone()))?;
    REGISTRY.register(Box::new(MAX_BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(AVG_BATCH_MS.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Copy a batch layer snapshot into the exported gauges.
pub fn sync_batch_metrics(snapshot: &MetricsSnapshot) {
    BATCHES.with_label_values(&["received"]).set(snapshot.batches_received as f64);
    BATCHES.with_label_values(&["completed"]).set(snapshot.batches_completed as f64);
    BATCHES.with_label_values(&["rejected"]).set(snapshot.batches_rejected as f64);
    SUB_REQUESTS.with_label_values(&["dispatched"]).set(snapshot.sub_requests_dispatched as f64);
    SUB_REQUESTS.with_label_values(&["failed"]).set(snapshot.sub_requests_failed as f64);
    PASSTHROUGH_REQUESTS.set(snapshot.passthrough_requests as f64);
    DOWNSTREAM_PANICS.set(snapshot.downstream_panics as f64);
    MAX_BATCH_SIZE.set(snapshot.max_batch_size as f64);
    AVG_BATCH_MS.set(snapshot.avg_batch_ms);
}

/// Tracks one upstream round trip.
/// Counts as an error if dropped without an explicit record.
pub struct UpstreamTimer {
    method: String,
    start: std::time::Instant,
    recorded: bool,
}

impl UpstreamTimer {
    pub fn new(method: &str) -> Self {
        ACTIVE_UPSTREAM_REQUESTS.inc();
        Self { method: method.to_string(), start: std::time::Instant::now(), recorded: false }
    }

    /// Record an upstream answer with its status code.
    pub fn record_response(mut self, status: u16) {
        self.finish(&status.to_string());
    }

    /// Record a request the upstream never answered.
    pub fn record_failure(mut self) {
        self.finish("error");
    }

    fn finish(&mut self, status: &str) {
        UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&[&self.method])
            .observe(self.start.elapsed().as_secs_f64());
        UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&[&self.method, status])
            .inc();

        ACTIVE_UPSTREAM_REQUESTS.dec();
        self.recorded = true;
    }
}

impl Drop for UpstreamTimer {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        ACTIVE_UPSTREAM_REQUESTS.dec();
        UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&[&self.method, "error"])
            .inc();
    }
}

/// Set backend health status.
pub fn set_backend_healthy(healthy: bool) {
    BACKEND_HEALTHY.set(if healthy { 1.0 } else { 0.0 });
}
