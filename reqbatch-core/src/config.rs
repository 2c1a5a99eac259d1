//! Configuration for the batch middleware.

use axum::http::Method;

/// Default endpoint path for batch envelopes
pub const DEFAULT_BATCH_PATH: &str = "/api/batch";

/// Default cap on the inbound envelope size (2 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Wire protocol revision accepted by the envelope codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Every element must carry a non-empty `method` and `path`
    #[default]
    Current,

    /// Elements may omit `method`; the batch request's own method is used
    Legacy,
}

/// Configuration for the batch middleware
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Method the batch endpoint answers to
    pub method: Method,

    /// Path of the batch endpoint
    pub path: String,

    /// Maximum size of the inbound envelope; larger bodies fail to read
    pub max_body_bytes: usize,

    /// Attach each sub-request's wall time to its response element
    pub include_duration: bool,

    /// Scheme used for sub-request targets when the inbound request
    /// does not reveal one
    pub default_scheme: String,

    /// Accepted wire protocol revision
    pub protocol: ProtocolVersion,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            method: Method::POST,
            path: DEFAULT_BATCH_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            include_duration: false,
            default_scheme: "http".to_string(),
            protocol: ProtocolVersion::Current,
        }
    }
}

impl BatchConfig {
    /// Create config for a batch endpoint at `path`
    pub fn with_path(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REQBATCH_METHOD") {
            if let Ok(method) = Method::from_bytes(val.trim().to_uppercase().as_bytes()) {
                config.method = method;
            }
        }

        if let Ok(val) = std::env::var("REQBATCH_PATH") {
            if val.starts_with('/') {
                config.path = val;
            }
        }

        if let Ok(val) = std::env::var("REQBATCH_MAX_BODY_BYTES") {
            if let Ok(n) = val.parse() {
                config.max_body_bytes = n;
            }
        }

        if let Ok(val) = std::env::var("REQBATCH_INCLUDE_DURATION") {
            config.include_duration = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("REQBATCH_DEFAULT_SCHEME") {
            if val == "http" || val == "https" {
                config.default_scheme = val;
            }
        }

        if let Ok(val) = std::env::var("REQBATCH_LEGACY_PROTOCOL") {
            if parse_flag(&val) {
                config.protocol = ProtocolVersion::Legacy;
            }
        }

        config
    }
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.method, Method::POST);
        assert_eq!(config.path, "/api/batch");
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert!(!config.include_duration);
        assert_eq!(config.protocol, ProtocolVersion::Current);
    }

    #[test]
    fn test_with_path() {
        let config = BatchConfig::with_path("/api/compose");
        assert_eq!(config.path, "/api/compose");
        assert_eq!(config.method, Method::POST);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("0"));
    }
}
