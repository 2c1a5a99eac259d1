//! Metrics module for the reqbatch proxy
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

pub use self::prometheus::{
    encode_metrics, register_metrics, set_backend_healthy, sync_batch_metrics, UpstreamTimer,
    BACKEND_HEALTHY, UPSTREAM_REQUESTS_TOTAL,
};
