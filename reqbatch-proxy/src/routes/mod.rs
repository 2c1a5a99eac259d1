//! HTTP route handlers for the reqbatch proxy.
//!
//! - `health`: Health check and metrics endpoints
//! - `forward`: Fallback that replays requests against the upstream

pub mod forward;
pub mod health;

pub use forward::forward;
pub use health::{health, live, metrics, metrics_prometheus, ready};
