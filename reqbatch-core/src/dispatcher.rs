//! Concurrent fan-out of sub-requests with ordered results.
//!
//! # Architecture
//!
//! ```text
//!   descriptors[0..N]
//!        │
//!        ├──► unit 0: materialize → service.oneshot → ResponseRecorder ──► slot 0
//!        ├──► unit 1: materialize → service.oneshot → ResponseRecorder ──► slot 1
//!        │    ...
//!        └──► unit N-1 ...                                              ──► slot N-1
//!                                                                            │
//!                                              join barrier (all N) ◄────────┘
//!                                                    │
//!                                             Vec<BatchItem> in input order
//! ```
//!
//! Every unit is its own tokio task holding its own clone of the downstream
//! service and its own request; the only thing units share is the read-only
//! [`Origin`]. The slot for index `i` is the `JoinHandle` of unit `i`, so
//! completion order never affects result order.
//!
//! A unit never fails: materialization errors become a synthetic `400`,
//! downstream errors and panics a synthetic `500`, each confined to its slot.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, HttpBody},
    http::{Request, Response, StatusCode},
    BoxError,
};
use bytes::Bytes;
use futures::{future::join_all, FutureExt};
use tower::{Service, ServiceExt};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::envelope::{BatchItem, SubRequestDescriptor};
use crate::materialize::{materialize, Origin};
use crate::metrics::BatchMetrics;
use crate::recorder::{CapturedResponse, ResponseRecorder};

/// Runs sub-requests against a downstream service.
pub struct Dispatcher<S> {
    service: S,
    metrics: Arc<BatchMetrics>,
    include_duration: bool,
}

impl<S, B> Dispatcher<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    pub fn new(service: S) -> Self {
        Self { service, metrics: Arc::new(BatchMetrics::new()), include_duration: false }
    }

    pub fn with_metrics(mut self, metrics: Arc<BatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach each unit's wall time to its result.
    pub fn include_duration(mut self, include: bool) -> Self {
        self.include_duration = include;
        self
    }

    /// Start every descriptor concurrently and return a future resolving to
    /// one result per descriptor, in input order.
    ///
    /// Units are spawned before this returns; the future is the join
    /// barrier and resolves once all of them have finished, so latency is
    /// that of the slowest sub-request.
    pub fn dispatch(
        &self,
        origin: &Origin,
        descriptors: Vec<SubRequestDescriptor>,
    ) -> impl Future<Output = Vec<BatchItem>> + Send + 'static {
        let span = info_span!("dispatch", size = descriptors.len());
        let origin = Arc::new(origin.clone());
        self.metrics.record_dispatched(descriptors.len());

        let mut echoes = Vec::with_capacity(descriptors.len());
        let mut slots = Vec::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            echoes.push((descriptor.method.clone(), descriptor.path.clone()));
            let unit = run_unit(
                index,
                self.service.clone(),
                Arc::clone(&origin),
                descriptor,
                Arc::clone(&self.metrics),
            );
            slots.push(tokio::spawn(unit.instrument(span.clone())));
        }

        let metrics = Arc::clone(&self.metrics);
        let include_duration = self.include_duration;

        async move {
            let outcomes = join_all(slots).await;

            echoes
                .into_iter()
                .zip(outcomes)
                .enumerate()
                .map(|(index, ((method, path), outcome))| {
                    let (response, elapsed) = outcome.unwrap_or_else(|join_error| {
                        error!(index, error = %join_error, "Sub-request task did not complete");
                        metrics.record_sub_request_failed();
                        (
                            CapturedResponse::synthetic(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                format!("sub-request did not complete: {join_error}"),
                            ),
                            Duration::ZERO,
                        )
                    });

                    BatchItem { method, path, response, duration: include_duration.then_some(elapsed) }
                })
                .collect()
        }
        .instrument(span)
    }
}

/// One unit of work. Panics inside the downstream service stop here.
async fn run_unit<S, B>(
    index: usize,
    service: S,
    origin: Arc<Origin>,
    descriptor: SubRequestDescriptor,
    metrics: Arc<BatchMetrics>,
) -> (CapturedResponse, Duration)
where
    S: Service<Request<Body>, Response = Response<B>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();

    let outcome =
        AssertUnwindSafe(execute(index, service, &origin, descriptor, &metrics)).catch_unwind().await;

    let response = match outcome {
        Ok(response) => response,
        Err(panic) => {
            let panic_msg = panic_message(panic.as_ref());
            error!(index, panic_msg = %panic_msg, "Downstream handler panicked");
            metrics.record_panic();
            metrics.record_sub_request_failed();
            CapturedResponse::synthetic(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("downstream handler panicked: {panic_msg}"),
            )
        }
    };

    (response, started.elapsed())
}

async fn execute<S, B>(
    index: usize,
    service: S,
    origin: &Origin,
    descriptor: SubRequestDescriptor,
    metrics: &BatchMetrics,
) -> CapturedResponse
where
    S: Service<Request<Body>, Response = Response<B>>,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let request = match materialize(origin, descriptor) {
        Ok(materialized) => materialized.into_request(),
        Err(e) => {
            warn!(index, error = %e, "Sub-request could not be materialized");
            metrics.record_sub_request_failed();
            return CapturedResponse::synthetic(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    debug!(index, method = %request.method(), uri = %request.uri(), "Dispatching sub-request");

    let response = match service.oneshot(request).await {
        Ok(response) => response,
        Err(e) => {
            let e: BoxError = e.into();
            warn!(index, error = %e, "Downstream handler returned an error");
            metrics.record_sub_request_failed();
            return CapturedResponse::synthetic(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("downstream handler failed: {e}"),
            );
        }
    };

    match ResponseRecorder::new().record(response).await {
        Ok(captured) => {
            debug!(index, status = %captured.status, bytes = captured.body.len(), "Sub-request complete");
            captured
        }
        Err(e) => {
            warn!(index, error = %e, "Downstream response body failed");
            metrics.record_sub_request_failed();
            CapturedResponse::synthetic(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("downstream response body failed: {e}"),
            )
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
