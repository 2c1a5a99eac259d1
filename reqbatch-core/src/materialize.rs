//! Builds an independent, executable request from a sub-request descriptor.
//!
//! Each sub-request gets its own [`MaterializedRequest`]; nothing from the
//! inbound batch request is mutated or shared apart from the read-only
//! [`Origin`].

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri},
};
use bytes::Bytes;

use crate::envelope::SubRequestDescriptor;
use crate::error::MaterializeError;

/// Scheme and authority of the inbound batch request.
///
/// Sub-requests are always same-origin with the batch endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    scheme: String,
    authority: Option<String>,
}

impl Origin {
    pub fn new(scheme: impl Into<String>, authority: Option<String>) -> Self {
        Self { scheme: scheme.into(), authority }
    }

    /// Resolve the origin of `request`.
    ///
    /// Absolute-form URIs win; otherwise `X-Forwarded-Proto` and `Host`
    /// are consulted, then `default_scheme` with no authority.
    pub fn from_request<B>(request: &Request<B>, default_scheme: &str) -> Self {
        let headers = request.headers();

        let scheme = request
            .uri()
            .scheme_str()
            .map(str::to_string)
            .or_else(|| {
                first_token(headers, "x-forwarded-proto").map(|s| s.to_ascii_lowercase())
            })
            .unwrap_or_else(|| default_scheme.to_string());

        let authority = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| first_token(headers, header::HOST.as_str()).map(str::to_string));

        Self { scheme, authority }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Prefix that turns an origin-relative target into an absolute one.
    fn prefix(&self) -> String {
        match &self.authority {
            Some(authority) => format!("{}://{}", self.scheme, authority),
            None => String::new(),
        }
    }
}

fn first_token<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The literal target of a sub-request, fragment included.
///
/// Attached to every materialized request as an extension because
/// [`Uri`] has no room for a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequestTarget(String);

impl SubRequestTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A request owned by exactly one unit of work.
#[derive(Debug)]
pub struct MaterializedRequest {
    pub method: Method,
    pub uri: Uri,
    pub target: SubRequestTarget,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MaterializedRequest {
    pub fn into_request(self) -> Request<Body> {
        let mut request = Request::new(Body::from(self.body));
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;
        request.extensions_mut().insert(self.target);
        request
    }
}

/// Turn `descriptor` into a request against `origin`.
pub fn materialize(
    origin: &Origin,
    descriptor: SubRequestDescriptor,
) -> Result<MaterializedRequest, MaterializeError> {
    let literal = descriptor.path;
    let path = literal.split_once('?').map_or(literal.as_str(), |(path, _)| path);

    if path.is_empty() {
        return Err(MaterializeError::EmptyPath);
    }
    if !path.starts_with('/') {
        return Err(MaterializeError::NotOriginRelative(literal));
    }

    let target = format!("{}{}", origin.prefix(), literal);
    let routable = target.split_once('#').map_or(target.as_str(), |(before, _)| before);
    let uri = Uri::try_from(routable).map_err(|e| MaterializeError::InvalidTarget {
        target: literal.clone(),
        message: e.to_string(),
    })?;

    let method = Method::from_bytes(descriptor.method.as_bytes())
        .map_err(|_| MaterializeError::InvalidMethod(descriptor.method.clone()))?;

    let mut headers = HeaderMap::with_capacity(descriptor.headers.len());
    for entry in descriptor.headers {
        let name = HeaderName::from_bytes(entry.key.as_bytes())
            .map_err(|_| MaterializeError::InvalidHeaderName(entry.key.clone()))?;
        let value = HeaderValue::from_str(&entry.value)
            .map_err(|_| MaterializeError::InvalidHeaderValue(entry.key.clone()))?;
        headers.append(name, value);
    }

    Ok(MaterializedRequest {
        method,
        uri,
        target: SubRequestTarget(target),
        headers,
        body: descriptor.body.map(Bytes::from).unwrap_or_default(),
    })
}
