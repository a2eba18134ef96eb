//! Error types for taskwire
//!
//! Two kinds of failure flow through the crates:
//!
//! - **Error**: everything that can go wrong locally (encoding, transport,
//!   configuration, timeouts) plus backend problems scoped to one request.
//! - **Problem**: the structured error shape the backend sends, either
//!   ambiently (an `error` envelope) or scoped to a request (`task.error`,
//!   `chat.error`).
//!
//! # Examples
//!
//! ```rust
//! use taskwire_core::{Error, Problem};
//!
//! let problem = Problem::new("Column not found").with_detail("no column 'age'");
//! let error = Error::from(problem);
//! assert_eq!(error.to_string(), "Column not found: no column 'age'");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for taskwire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type
///
/// Transport errors never reach callers of `send`; the connection manager
/// absorbs them and reconnects. They show up here only for operations that
/// talk to the socket directly, such as the initial handshake in tests.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The backend rejected this particular request
    #[error("{0}")]
    Problem(#[from] Problem),

    /// Serialization or deserialization error
    ///
    /// Usually a payload whose shape does not match the type it is decoded
    /// into.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Envelope with an empty or malformed message type
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Bad endpoint or builder settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant broken
    #[error("Internal error: {0}")]
    Internal(String),

    /// No reply arrived within the configured request timeout
    #[error("Request timeout")]
    Timeout,

    /// The service was closed, or reconnection was abandoned
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// The backend problem carried by this error, if any
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::Problem(problem) => Some(problem),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Structured error reported by the backend
///
/// The same shape is used for ambient notifications and for request-scoped
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Short, human-readable summary
    pub title: String,

    /// Longer explanation, if the backend provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Problem {
    /// Create a problem with only a title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail: None,
        }
    }

    /// Attach a detail message
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.title, detail),
            None => write!(f, "{}", self.title),
        }
    }
}

impl std::error::Error for Problem {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_problem_display_without_detail() {
        let problem = Problem::new("boom");
        assert_eq!(problem.to_string(), "boom");
    }

    #[test]
    fn test_problem_display_with_detail() {
        let problem = Problem::new("Task failed").with_detail("division by zero");
        assert_eq!(problem.to_string(), "Task failed: division by zero");
    }

    #[test]
    fn test_problem_deserialize_title_only() {
        let problem: Problem = serde_json::from_value(json!({"title": "boom"})).unwrap();
        assert_eq!(problem, Problem::new("boom"));
    }

    #[test]
    fn test_problem_requires_title() {
        let result = serde_json::from_value::<Problem>(json!({"detail": "no title"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_problem_serialization_skips_missing_detail() {
        let serialized = serde_json::to_string(&Problem::new("boom")).unwrap();
        assert_eq!(serialized, r#"{"title":"boom"}"#);
    }

    #[test]
    fn test_error_from_problem() {
        let error = Error::from(Problem::new("boom"));
        assert_eq!(error.problem().map(|p| p.title.as_str()), Some("boom"));
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn test_error_from_serde() {
        let serde_error = serde_json::from_str::<serde_json::Value>(r#"{"invalid": json"#)
            .unwrap_err();
        let error = Error::from(serde_error);

        match error {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_non_problem_errors_have_no_problem() {
        assert!(Error::Timeout.problem().is_none());
        assert!(Error::ConnectionClosed.problem().is_none());
        assert_eq!(Error::Timeout.to_string(), "Request timeout");
    }
}
