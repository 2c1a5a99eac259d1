//! Application state for the reqbatch proxy.

use std::sync::Arc;

use reqbatch_core::{BatchConfig, BatchMetrics};
use tokio::sync::Mutex;

use crate::error::ProxyError;
use crate::upstream::UpstreamProxy;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:8080";

/// Application state shared across all handlers
pub struct AppState {
    /// Client for the upstream service
    pub upstream: UpstreamProxy,

    /// Forwarding statistics
    pub stats: Mutex<ProxyStats>,

    /// Counters shared with the batch layer
    pub batch_metrics: Arc<BatchMetrics>,

    /// Batch endpoint configuration
    pub batch_config: BatchConfig,

    /// Configuration
    pub config: ProxyConfig,
}

impl AppState {
    pub fn new(config: ProxyConfig, batch_config: BatchConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            upstream: UpstreamProxy::new(&config.upstream_url)?,
            stats: Mutex::new(ProxyStats::default()),
            batch_metrics: Arc::new(BatchMetrics::new()),
            batch_config,
            config,
        })
    }
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Port to listen on
    pub port: u16,

    /// Base URL requests are forwarded to
    pub upstream_url: String,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT, upstream_url: DEFAULT_UPSTREAM_URL.to_string(), verbose: false }
    }
}

impl ProxyConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("REQBATCH_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            upstream_url: std::env::var("REQBATCH_UPSTREAM_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            verbose: std::env::var("REQBATCH_VERBOSE")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }
}

/// Forwarding statistics
#[derive(Debug, Default)]
pub struct ProxyStats {
    /// Requests handed to the upstream
    pub requests_total: u64,

    /// Requests the upstream answered
    pub requests_success: u64,

    /// Requests that never got an upstream answer
    pub requests_failed: u64,

    /// Total time spent waiting on the upstream in milliseconds
    pub forward_time_ms: u64,
}

impl ProxyStats {
    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            1.0
        } else {
            self.requests_success as f64 / self.requests_total as f64
        }
    }

    /// Average upstream round trip for answered requests
    pub fn avg_forward_ms(&self) -> f64 {
        if self.requests_success == 0 {
            0.0
        } else {
            self.forward_time_ms as f64 / self.requests_success as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.upstream_url, "http://localhost:8080");
        assert!(!config.verbose);
    }

    #[test]
    fn test_stats_calculations() {
        let stats = ProxyStats {
            requests_total: 100,
            requests_success: 95,
            requests_failed: 5,
            forward_time_ms: 1900,
        };

        assert!((stats.success_rate() - 0.95).abs() < 0.001);
        assert!((stats.avg_forward_ms() - 20.0).abs() < 0.001);
    }

    #[test]
    fn test_stats_edge_cases() {
        let stats = ProxyStats::default();

        assert_eq!(stats.success_rate(), 1.0); // No requests = 100% success
        assert_eq!(stats.avg_forward_ms(), 0.0);
    }

    #[test]
    fn test_state_shares_batch_config() {
        let batch_config = BatchConfig::with_path("/batch");
        let state = AppState::new(ProxyConfig::default(), batch_config).unwrap();

        assert_eq!(state.batch_config.path, "/batch");
        assert_eq!(state.upstream.base_url(), "http://localhost:8080");
    }
}
