//! reqbatch proxy - serves many HTTP requests through one.
//!
//! The proxy sits in front of an upstream HTTP service and adds a batch
//! endpoint: POST a JSON array of sub-requests and get back a JSON array of
//! their responses, in order.
//!
//! ## Quick Start
//!
//! ```bash
//! # Start with defaults (port 8000, upstream at localhost:8080)
//! reqbatch-proxy
//!
//! # Custom configuration
//! REQBATCH_UPSTREAM_URL=http://10.0.0.2:3000 REQBATCH_PORT=9000 reqbatch-proxy
//! ```
//!
//! ## Sending a batch
//!
//! ```bash
//! curl -s localhost:8000/api/batch -d '[
//!   {"method": "GET", "path": "/users/1"},
//!   {"method": "PUT", "path": "/users/2", "body": "{\"name\":\"b\"}",
//!    "headers": [{"key": "Content-Type", "value": "application/json"}]}
//! ]'
//! ```

use reqbatch_proxy::{run_server, ProxyConfig, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let verbose = ProxyConfig::from_env().verbose;
    let default_filter = if verbose {
        "reqbatch_proxy=debug,reqbatch_core=debug,tower_http=debug"
    } else {
        "reqbatch_proxy=info,reqbatch_core=info,tower_http=info"
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    run_server(ServerConfig::from_env()).await
}
