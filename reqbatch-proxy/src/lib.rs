//! reqbatch proxy library
//!
//! HTTP server that mounts the batch middleware in front of an upstream
//! service. Health and metrics routes are served locally; everything else
//! is forwarded. Batch sub-requests go through the same router, so one
//! envelope can mix local routes and upstream routes.

use axum::{routing::get, Router};
use reqbatch_core::{BatchConfig, BatchLayer, BatchService};
use std::sync::Arc;
use tower::Layer;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod upstream;

pub use error::ProxyError;
pub use state::{AppState, ProxyConfig};
pub use upstream::UpstreamProxy;

/// Server configuration for the proxy
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Upstream base URL
    pub upstream_url: String,
    /// Batch endpoint configuration
    pub batch: BatchConfig,
    /// Whether to print the banner on startup
    pub print_banner: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: state::DEFAULT_PORT,
            upstream_url: state::DEFAULT_UPSTREAM_URL.to_string(),
            batch: BatchConfig::default(),
            print_banner: true,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let proxy = ProxyConfig::from_env();
        Self {
            port: proxy.port,
            upstream_url: proxy.upstream_url,
            batch: BatchConfig::from_env(),
            print_banner: true,
        }
    }
}

impl From<ServerConfig> for ProxyConfig {
    fn from(config: ServerConfig) -> Self {
        ProxyConfig { port: config.port, upstream_url: config.upstream_url, verbose: false }
    }
}

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the proxy service: local routes plus upstream fallback, wrapped in
/// the batch layer.
pub fn build_app(state: Arc<AppState>) -> BatchService<Router> {
    let router = Router::new()
        // Health endpoints
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/live", get(routes::live))
        .route("/metrics", get(routes::metrics))
        .route("/metrics/prometheus", get(routes::metrics_prometheus))
        // Everything else goes upstream
        .fallback(routes::forward)
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    BatchLayer::new(state.batch_config.clone())
        .with_metrics(Arc::clone(&state.batch_metrics))
        .layer(router)
}

/// Run the reqbatch proxy server.
///
/// This function starts the HTTP server and blocks until it's shut down.
///
/// # Example
/// ```no_run
/// use reqbatch_proxy::{run_server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig {
///         port: 8000,
///         upstream_url: "http://localhost:8080".to_string(),
///         ..Default::default()
///     };
///     run_server(config).await
/// }
/// ```
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    init_metrics();

    let proxy_config = ProxyConfig::from(config.clone());

    info!(
        port = proxy_config.port,
        upstream_url = %proxy_config.upstream_url,
        "Starting reqbatch proxy v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(proxy_config.clone(), config.batch.clone())?);

    // Check upstream connectivity
    match state.upstream.health_check().await {
        Ok(_) => {
            metrics::set_backend_healthy(true);
            info!("Connected to upstream at {}", proxy_config.upstream_url);
        }
        Err(e) => {
            metrics::set_backend_healthy(false);
            warn!(
                "Could not reach upstream at {}: {}. \
                 Proxy will start anyway and forward on demand.",
                proxy_config.upstream_url, e
            );
        }
    }

    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("reqbatch proxy listening on http://{}", addr);
    info!("Batch:  {} http://{}{}", config.batch.method, addr, config.batch.path);
    info!("Health: http://{}/health", addr);

    if config.print_banner {
        print_banner(&config);
    }

    axum::serve(listener, axum::ServiceExt::into_make_service(app)).await?;

    Ok(())
}

/// Print the startup banner
fn print_banner(config: &ServerConfig) {
    let addr = format!("0.0.0.0:{}", config.port);

    println!();
    println!("==================================================");
    println!("  reqbatch proxy v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://{}", addr);
    println!("  Upstream:     {}", config.upstream_url);
    println!();
    println!("  Batch configuration:");
    println!("    Endpoint: {} {}", config.batch.method, config.batch.path);
    println!("    Max body: {} bytes", config.batch.max_body_bytes);
    println!("    Protocol: {:?}", config.batch.protocol);
    println!(
        "    Durations: {}",
        if config.batch.include_duration { "reported" } else { "omitted" }
    );
    println!();
    println!("  Endpoints:");
    println!("    Health: GET  /health, /ready, /live, /metrics");
    println!("    Prometheus: GET /metrics/prometheus");
    println!("    Everything else is forwarded upstream");
    println!("==================================================");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_into_proxy_config() {
        let config = ServerConfig {
            port: 9000,
            upstream_url: "http://10.0.0.2:3000".to_string(),
            ..Default::default()
        };

        let proxy: ProxyConfig = config.into();
        assert_eq!(proxy.port, 9000);
        assert_eq!(proxy.upstream_url, "http://10.0.0.2:3000");
        assert!(!proxy.verbose);
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.batch.path, "/api/batch");
        assert!(config.print_banner);
    }
}
