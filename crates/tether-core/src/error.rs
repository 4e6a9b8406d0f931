//! Structured error types shared across the crate.
//!
//! Each failure family carries a kind enum for programmatic handling plus a
//! display message. Everything converts into `anyhow::Error` at call edges.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A wire line that could not be normalized into an event.
///
/// Parse failures are absorbed by the transport (logged and skipped); they
/// never terminate a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseFailure {
    /// The line was not valid JSON.
    MalformedJson { detail: String },
    /// A required field was absent.
    MissingField { field: String },
    /// The payload was valid JSON but not an object.
    NotAnObject,
}

impl ParseFailure {
    pub fn missing_field(field: impl Into<String>) -> Self {
        ParseFailure::MissingField { field: field.into() }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::MalformedJson { detail } => write!(f, "malformed JSON: {detail}"),
            ParseFailure::MissingField { field } => write!(f, "missing required field: {field}"),
            ParseFailure::NotAnObject => write!(f, "payload is not a JSON object"),
        }
    }
}

impl std::error::Error for ParseFailure {}

/// Categories of transport errors for consistent handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection timeout or request timeout
    Timeout,
    /// Network-level failure (DNS, refused, reset mid-stream)
    Network,
    /// Connect called without a usable path or staged body
    NotRoutable,
    /// Retry budget exhausted on the subscription dialect
    RetriesExhausted,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::HttpStatus => write!(f, "http_status"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Network => write!(f, "network"),
            TransportErrorKind::NotRoutable => write!(f, "not_routable"),
            TransportErrorKind::RetriesExhausted => write!(f, "retries_exhausted"),
        }
    }
}

/// Structured transport failure with kind and details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, lifting a cleaner message out of a
    /// JSON error body when one is present.
    pub fn http_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}");
        let details = if body.is_empty() {
            None
        } else {
            if let Ok(json) = serde_json::from_str::<Value>(body) {
                if let Some(msg) = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                {
                    return Self {
                        kind: TransportErrorKind::HttpStatus,
                        message: format!("HTTP {status}: {msg}"),
                        details: Some(body.to_string()),
                    };
                }
            }
            Some(body.to_string())
        };
        Self {
            kind: TransportErrorKind::HttpStatus,
            message,
            details,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn not_routable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotRoutable, message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Upstream rejected session creation.
///
/// Surfaced synchronously to the caller; no placeholder session exists after
/// this error.
#[derive(Debug, Clone)]
pub struct SessionCreationError {
    pub message: String,
    pub details: Option<String>,
}

impl SessionCreationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }
}

impl From<TransportError> for SessionCreationError {
    fn from(err: TransportError) -> Self {
        Self {
            message: err.message,
            details: err.details,
        }
    }
}

impl fmt::Display for SessionCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session creation failed: {}", self.message)
    }
}

impl std::error::Error for SessionCreationError {}

/// Classifies a reqwest error into a transport error.
pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        TransportError::network(format!("Connection failed: {e}"))
    } else {
        TransportError::network(format!("Request failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_extracts_json_error_message() {
        let err = TransportError::http_status(503, r#"{"error":{"message":"overloaded"}}"#);
        assert_eq!(err.kind, TransportErrorKind::HttpStatus);
        assert_eq!(err.message, "HTTP 503: overloaded");
        assert!(err.details.is_some());
    }

    #[test]
    fn test_http_status_plain_body() {
        let err = TransportError::http_status(500, "boom");
        assert_eq!(err.message, "HTTP 500");
        assert_eq!(err.details.as_deref(), Some("boom"));
    }

    #[test]
    fn test_parse_failure_display_names_the_field() {
        let err = ParseFailure::missing_field("invocationId");
        assert_eq!(err.to_string(), "missing required field: invocationId");
    }
}
