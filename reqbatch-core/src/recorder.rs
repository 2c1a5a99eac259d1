//! In-memory response sink for a single sub-request.
//!
//! A [`ResponseRecorder`] stands in for the network connection while the
//! downstream handler runs. It is created per sub-request, never shared,
//! and consumed by [`ResponseRecorder::finalize`].

use std::borrow::Cow;

use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode},
    BoxError,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::debug;

/// Snapshot of everything the downstream handler wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// A response the dispatcher produces itself when a sub-request could
    /// not be executed.
    pub fn synthetic(status: StatusCode, message: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self { status, headers, body: Bytes::from(message.into()) }
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl Default for CapturedResponse {
    fn default() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new() }
    }
}

/// Capturing response sink.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
    body: Option<BytesMut>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers written so far, if any.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Header map, allocated on first use.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.headers.get_or_insert_with(HeaderMap::new)
    }

    /// Record the status code.
    ///
    /// Once body bytes have been written the status is fixed, as it would be
    /// on a real connection, and later calls are ignored.
    pub fn write_status(&mut self, status: StatusCode) {
        if self.body.is_some() {
            debug!(status = %status, "Status written after body, ignoring");
            return;
        }
        self.status = Some(status);
    }

    /// Append body bytes. Writing without a status implies `200 OK`.
    pub fn write(&mut self, chunk: &[u8]) -> usize {
        self.status.get_or_insert(StatusCode::OK);
        self.body.get_or_insert_with(BytesMut::new).extend_from_slice(chunk);
        chunk.len()
    }

    pub fn finalize(self) -> CapturedResponse {
        CapturedResponse {
            status: self.status.unwrap_or(StatusCode::OK),
            headers: self.headers.unwrap_or_default(),
            body: self.body.map(BytesMut::freeze).unwrap_or_default(),
        }
    }

    /// Drain a downstream `Response` through the sink operations and
    /// finalize.
    ///
    /// Fails only if the response body stream yields an error.
    pub async fn record<B>(mut self, response: Response<B>) -> Result<CapturedResponse, axum::Error>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = response.into_parts();
        self.write_status(parts.status);

        if !parts.headers.is_empty() {
            let headers = self.headers_mut();
            for (name, value) in parts.headers.iter() {
                // The body is re-framed inside the envelope
                if is_framing_header(name) {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }

        let mut stream = Body::new(body).into_data_stream();
        while let Some(chunk) = stream.next().await {
            self.write(&chunk?);
        }

        Ok(self.finalize())
    }
}

fn is_framing_header(name: &HeaderName) -> bool {
    *name == header::CONTENT_LENGTH || *name == header::TRANSFER_ENCODING
}
