//! JSON envelope codec.
//!
//! Request envelope:
//!
//! ```json
//! [
//!   { "method": "GET", "path": "/a?b=1",
//!     "headers": [{ "key": "Accept", "value": "text/plain" }],
//!     "body": "" }
//! ]
//! ```
//!
//! Response envelope, same length and order:
//!
//! ```json
//! [
//!   { "method": "GET", "path": "/a?b=1", "status": 200,
//!     "headers": { "Content-Type": ["text/plain"] },
//!     "body": "A" }
//! ]
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};

use crate::config::ProtocolVersion;
use crate::error::DecodeError;
use crate::recorder::CapturedResponse;

/// One header line of a sub-request, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// A validated sub-request, immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequestDescriptor {
    pub method: String,
    /// Path with optional query string and fragment, verbatim
    pub path: String,
    pub headers: Vec<HeaderEntry>,
    pub body: Option<String>,
}

impl SubRequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self { method: method.into(), path: path.into(), headers: Vec::new(), body: None }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderEntry::new(key, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Result of one sub-request, ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub method: String,
    pub path: String,
    pub response: CapturedResponse,
    pub duration: Option<Duration>,
}

#[derive(Deserialize)]
struct WireRequest {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    headers: Option<Vec<HeaderEntry>>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    method: &'a str,
    path: &'a str,
    status: u16,
    headers: BTreeMap<String, Vec<String>>,
    body: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
}

impl<'a> From<&'a BatchItem> for WireResponse<'a> {
    fn from(item: &'a BatchItem) -> Self {
        Self {
            method: &item.method,
            path: &item.path,
            status: item.response.status.as_u16(),
            headers: header_multimap(&item.response.headers),
            body: item.response.body_text(),
            duration: item.duration.map(|d| format!("{:?}", d)),
        }
    }
}

/// Encoder/decoder for batch envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    protocol: ProtocolVersion,
}

impl EnvelopeCodec {
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self { protocol }
    }

    /// Decode and validate the whole envelope.
    ///
    /// Either every element is valid or the batch is rejected; nothing is
    /// returned for partial execution. `inbound_method` is only consulted
    /// by the legacy protocol, where elements may omit `method`.
    pub fn decode(
        &self,
        bytes: &[u8],
        inbound_method: &Method,
    ) -> Result<Vec<SubRequestDescriptor>, DecodeError> {
        let wire: Vec<WireRequest> = serde_json::from_slice(bytes)?;

        wire.into_iter()
            .enumerate()
            .map(|(index, element)| self.validate(index, element, inbound_method))
            .collect()
    }

    fn validate(
        &self,
        index: usize,
        element: WireRequest,
        inbound_method: &Method,
    ) -> Result<SubRequestDescriptor, DecodeError> {
        let path = element.path.filter(|p| !p.is_empty());
        let path = path.ok_or_else(|| DecodeError::invalid(index, "missing path"))?;

        let method = match (element.method.filter(|m| !m.is_empty()), self.protocol) {
            (Some(method), _) => method,
            (None, ProtocolVersion::Legacy) => inbound_method.to_string(),
            (None, ProtocolVersion::Current) => {
                return Err(DecodeError::invalid(index, "missing method"));
            }
        };

        Ok(SubRequestDescriptor {
            method,
            path,
            headers: element.headers.unwrap_or_default(),
            body: element.body,
        })
    }

    /// Encode results in the order given.
    pub fn encode(&self, items: &[BatchItem]) -> Result<Vec<u8>, serde_json::Error> {
        let wire: Vec<WireResponse<'_>> = items.iter().map(WireResponse::from).collect();
        serde_json::to_vec(&wire)
    }
}

/// Group header values by canonical name, keeping per-name arrival order.
fn header_multimap(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers.iter() {
        map.entry(canonical_header_key(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// Canonical MIME form of a header name: `content-type` → `Content-Type`.
pub fn canonical_header_key(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
            upper = c == '-';
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use bytes::Bytes;

    fn decode(json: &str) -> Result<Vec<SubRequestDescriptor>, DecodeError> {
        EnvelopeCodec::default().decode(json.as_bytes(), &Method::POST)
    }

    #[test]
    fn test_decode_full_element() {
        let descriptors = decode(
            r#"[{
                "method": "PUT",
                "path": "/a?b=1#c",
                "headers": [
                    { "key": "K1", "value": "v1" },
                    { "key": "K2", "value": "v2" },
                    { "key": "K1", "value": "v3" }
                ],
                "body": "req bod",
                "ignored": true
            }]"#,
        )
        .unwrap();

        let expected = SubRequestDescriptor::new("PUT", "/a?b=1#c")
            .with_header("K1", "v1")
            .with_header("K2", "v2")
            .with_header("K1", "v3")
            .with_body("req bod");
        assert_eq!(descriptors, vec![expected]);
    }

    #[test]
    fn test_decode_preserves_order() {
        let descriptors = decode(
            r#"[{"method":"GET","path":"/1"},{"method":"GET","path":"/2"},{"method":"DELETE","path":"/3"}]"#,
        )
        .unwrap();
        let paths: Vec<_> = descriptors.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/1", "/2", "/3"]);
        assert_eq!(descriptors[2].method, "DELETE");
    }

    #[test]
    fn test_decode_empty_batch() {
        assert!(decode("[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_malformed() {
        for payload in ["", "{", "{}", "null", "[1, 2]", r#"[{"method": 5, "path": "/a"}]"#] {
            assert!(
                matches!(decode(payload), Err(DecodeError::MalformedPayload(_))),
                "payload {payload:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_missing_fields() {
        let err = decode(r#"[{"method":"GET","path":"/a"},{"path":"/b"}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDescriptor { index: 1, .. }));

        let err = decode(r#"[{"method":"GET","path":""}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDescriptor { index: 0, .. }));

        let err = decode(r#"[{"method":"","path":"/a"}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDescriptor { index: 0, .. }));
    }

    #[test]
    fn test_decode_legacy_inherits_method() {
        let codec = EnvelopeCodec::new(ProtocolVersion::Legacy);
        let descriptors = codec
            .decode(br#"[{"path":"/a"},{"method":"PUT","path":"/b"}]"#, &Method::GET)
            .unwrap();
        assert_eq!(descriptors[0].method, "GET");
        assert_eq!(descriptors[1].method, "PUT");

        let err = codec.decode(br#"[{"method":"GET"}]"#, &Method::GET).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_encode_shape() {
        let mut headers = HeaderMap::new();
        headers.append("h1", HeaderValue::from_static("hA"));
        let items = vec![
            BatchItem {
                method: "GET".into(),
                path: "/a".into(),
                response: CapturedResponse {
                    status: StatusCode::OK,
                    headers,
                    body: Bytes::from_static(b"A"),
                },
                duration: None,
            },
            BatchItem {
                method: "GET".into(),
                path: "/missing".into(),
                response: CapturedResponse {
                    status: StatusCode::NOT_FOUND,
                    ..Default::default()
                },
                duration: None,
            },
        ];

        let encoded = EnvelopeCodec::default().encode(&items).unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"[{"method":"GET","path":"/a","status":200,"headers":{"H1":["hA"]},"body":"A"},{"method":"GET","path":"/missing","status":404,"headers":{},"body":""}]"#
        );
    }

    #[test]
    fn test_encode_duration() {
        let item = BatchItem {
            method: "GET".into(),
            path: "/a".into(),
            response: CapturedResponse::default(),
            duration: Some(Duration::from_millis(3)),
        };
        let encoded = EnvelopeCodec::default().encode(&[item]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value[0]["duration"], "3ms");
    }

    #[test]
    fn test_header_multimap_groups_values() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("content-type", HeaderValue::from_static("text/plain"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let map = header_multimap(&headers);
        assert_eq!(map["Set-Cookie"], vec!["a=1", "b=2"]);
        assert_eq!(map["Content-Type"], vec!["text/plain"]);
    }

    #[test]
    fn test_canonical_header_key() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("h1"), "H1");
        assert_eq!(canonical_header_key("x-REQUEST-id"), "X-Request-Id");
        assert_eq!(canonical_header_key("etag"), "Etag");
    }
}
