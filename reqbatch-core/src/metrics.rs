//! Counters for the batch middleware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Lock-free counters shared by every batch the middleware serves
#[derive(Debug, Default)]
pub struct BatchMetrics {
    /// Requests the gate accepted as batch envelopes
    pub batches_received: AtomicU64,

    /// Batches that produced an aggregate response
    pub batches_completed: AtomicU64,

    /// Batches rejected before dispatch (unreadable or invalid envelope)
    pub batches_rejected: AtomicU64,

    /// Requests forwarded untouched to the downstream handler
    pub passthrough_requests: AtomicU64,

    /// Sub-requests dispatched
    pub sub_requests_dispatched: AtomicU64,

    /// Sub-requests answered with a synthetic error response
    pub sub_requests_failed: AtomicU64,

    /// Downstream panics caught at a unit boundary
    pub downstream_panics: AtomicU64,

    /// Largest batch observed
    pub max_batch_size: AtomicU64,

    /// Total wall time of completed batches in milliseconds (for averaging)
    pub total_batch_ms: AtomicU64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch about to fan out into `size` sub-requests
    pub fn record_dispatched(&self, size: usize) {
        let size = size as u64;
        self.sub_requests_dispatched.fetch_add(size, Ordering::Relaxed);

        let mut current_max = self.max_batch_size.load(Ordering::Relaxed);
        while size > current_max {
            match self.max_batch_size.compare_exchange_weak(
                current_max,
                size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    pub fn record_sub_request_failed(&self) {
        self.sub_requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.downstream_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, elapsed: Duration) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.total_batch_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Average batch wall time in milliseconds
    pub fn avg_batch_ms(&self) -> f64 {
        let completed = self.batches_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.total_batch_ms.load(Ordering::Relaxed) as f64 / completed as f64
    }

    /// Average number of sub-requests per completed batch
    pub fn avg_batch_size(&self) -> f64 {
        let completed = self.batches_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.sub_requests_dispatched.load(Ordering::Relaxed) as f64 / completed as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            passthrough_requests: self.passthrough_requests.load(Ordering::Relaxed),
            sub_requests_dispatched: self.sub_requests_dispatched.load(Ordering::Relaxed),
            sub_requests_failed: self.sub_requests_failed.load(Ordering::Relaxed),
            downstream_panics: self.downstream_panics.load(Ordering::Relaxed),
            max_batch_size: self.max_batch_size.load(Ordering::Relaxed),
            avg_batch_ms: self.avg_batch_ms(),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub batches_completed: u64,
    pub batches_rejected: u64,
    pub passthrough_requests: u64,
    pub sub_requests_dispatched: u64,
    pub sub_requests_failed: u64,
    pub downstream_panics: u64,
    pub max_batch_size: u64,
    pub avg_batch_ms: f64,
    pub avg_batch_size: f64,
}
