//! Error types for the batching middleware.
//!
//! Errors are split by blast radius:
//!
//! ```text
//! BatchError (whole batch, reported once on the outer response)
//! ├── BodyRead        - inbound payload could not be read      → 500
//! ├── Decode          - DecodeError                             → 400
//! │   ├── MalformedPayload
//! │   └── InvalidDescriptor
//! └── Encode          - aggregate could not be serialized       → 500
//!
//! MaterializeError (one sub-request, captured inside the aggregate)
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors raised while decoding and validating a batch envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not a JSON array of objects
    #[error("Malformed batch payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// An element is missing a required field
    #[error("Invalid sub-request at index {index}: {reason}")]
    InvalidDescriptor { index: usize, reason: String },
}

impl DecodeError {
    pub(crate) fn invalid(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor { index, reason: reason.into() }
    }
}

/// Errors raised while turning a descriptor into an executable request.
///
/// These never abort a batch; the dispatcher turns them into a synthetic
/// `400 Bad Request` for the affected slot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("empty path")]
    EmptyPath,

    /// Target is not origin-relative (cross-origin targets are not supported)
    #[error("path must start with '/': {0}")]
    NotOriginRelative(String),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),

    #[error("invalid target {target}: {message}")]
    InvalidTarget { target: String, message: String },
}

/// Failures that affect the whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to read batch body: {0}")]
    BodyRead(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Failed to encode batch response: {0}")]
    Encode(serde_json::Error),
}

impl BatchError {
    /// Status code used for the outer response.
    pub fn status(&self) -> StatusCode {
        match self {
            BatchError::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BatchError::Decode(_) => StatusCode::BAD_REQUEST,
            BatchError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            BatchError::BodyRead(_) => "BodyRead",
            BatchError::Decode(DecodeError::MalformedPayload(_)) => "MalformedPayload",
            BatchError::Decode(DecodeError::InvalidDescriptor { .. }) => "InvalidDescriptor",
            BatchError::Encode(_) => "Encode",
        }
    }
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
            }
        }));

        (self.status(), body).into_response()
    }
}
