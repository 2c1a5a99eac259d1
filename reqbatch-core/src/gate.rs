//! Decides whether an inbound request is a batch envelope.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
};

use crate::config::BatchConfig;

type Matcher = dyn Fn(&Request<Body>) -> bool + Send + Sync;

/// Predicate selecting the requests the dispatcher handles.
///
/// Anything the gate rejects is forwarded to the downstream handler as-is.
#[derive(Clone)]
pub enum BatchGate {
    /// Exact method and path match
    Route { method: Method, path: String },

    /// Caller-supplied matcher, for routers that own the decision
    Predicate(Arc<Matcher>),
}

impl BatchGate {
    pub fn route(method: Method, path: impl Into<String>) -> Self {
        Self::Route { method, path: path.into() }
    }

    pub fn predicate<F>(matcher: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(matcher))
    }

    pub fn matches(&self, request: &Request<Body>) -> bool {
        match self {
            BatchGate::Route { method, path } => {
                request.method() == method && request.uri().path() == path
            }
            BatchGate::Predicate(matcher) => matcher(request),
        }
    }
}

impl From<&BatchConfig> for BatchGate {
    fn from(config: &BatchConfig) -> Self {
        Self::route(config.method.clone(), config.path.clone())
    }
}

impl Default for BatchGate {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl fmt::Debug for BatchGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchGate::Route { method, path } => {
                f.debug_struct("Route").field("method", method).field("path", path).finish()
            }
            BatchGate::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_default_route() {
        let gate = BatchGate::default();
        assert!(gate.matches(&request(Method::POST, "/api/batch")));
        assert!(gate.matches(&request(Method::POST, "http://localhost/api/batch?x=1")));
        assert!(!gate.matches(&request(Method::GET, "/api/batch")));
        assert!(!gate.matches(&request(Method::POST, "/api/batch/")));
        assert!(!gate.matches(&request(Method::POST, "/api/other")));
    }

    #[test]
    fn test_predicate() {
        let gate = BatchGate::predicate(|req| req.uri().path().ends_with("/compose"));
        assert!(gate.matches(&request(Method::GET, "/v2/compose")));
        assert!(!gate.matches(&request(Method::POST, "/api/batch")));
    }

    #[test]
    fn test_debug_hides_closure() {
        let gate = BatchGate::predicate(|_| true);
        assert_eq!(format!("{:?}", gate), "Predicate(..)");
    }
}
