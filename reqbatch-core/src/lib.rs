//! reqbatch core library
//!
//! Serves many HTTP requests through one: a batch envelope (a JSON array of
//! sub-requests) is fanned out concurrently against an existing tower
//! service, and the responses come back as one JSON array in the order the
//! caller sent them.
//!
//! ```rust,ignore
//! use axum::{routing::get, Router};
//! use reqbatch_core::{BatchConfig, BatchLayer};
//! use tower::Layer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let app = Router::new().route("/a", get(|| async { "A" }));
//! let app = BatchLayer::new(BatchConfig::default()).layer(app);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, axum::ServiceExt::into_make_service(app)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod layer;
pub mod materialize;
pub mod metrics;
pub mod recorder;

pub use config::{BatchConfig, ProtocolVersion};
pub use dispatcher::Dispatcher;
pub use envelope::{BatchItem, EnvelopeCodec, HeaderEntry, SubRequestDescriptor};
pub use error::{BatchError, DecodeError, MaterializeError};
pub use gate::BatchGate;
pub use layer::{BatchLayer, BatchService};
pub use materialize::{materialize, MaterializedRequest, Origin, SubRequestTarget};
pub use metrics::{BatchMetrics, MetricsSnapshot};
pub use recorder::{CapturedResponse, ResponseRecorder};
