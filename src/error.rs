//! Error types
//!
//! Two boundaries carry errors in this crate:
//!
//! - [`GcpError`] is what the REST layer returns. API failures keep the
//!   structured payload GCP sent back as a [`RemoteError`].
//! - [`OperationError`] is what a lifecycle operation hands to the host:
//!   either "retry later" or a terminal failure.
//!
//! [`crate::lifecycle::classify`] is the only place that turns the first into
//! the second.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Structured error returned by a GCP REST endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API request failed ({status}): {message}")]
pub struct RemoteError {
    /// HTTP status code
    pub status: u16,
    /// `error.message` from the payload, or the raw body when it is not JSON
    pub message: String,
    /// `error.errors[].reason` values, e.g. `resourceInUseByAnotherResource`
    pub reasons: Vec<String>,
}

impl RemoteError {
    /// Decode an error body of the form
    /// `{"error": {"code": 409, "message": "...", "errors": [{"reason": "..."}]}}`
    pub fn from_body(status: u16, body: &str) -> Self {
        let Ok(payload) = serde_json::from_str::<Value>(body) else {
            return Self {
                status,
                message: body.trim().to_string(),
                reasons: Vec::new(),
            };
        };

        let error = payload.get("error").unwrap_or(&Value::Null);

        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            // Some APIs put a bare string in `error`
            .or_else(|| error.as_str())
            .unwrap_or_default()
            .to_string();

        let mut reasons: Vec<String> = error
            .get("errors")
            .and_then(|v| v.as_array())
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e.get("reason").and_then(|r| r.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // Newer APIs report a canonical status like ALREADY_EXISTS instead of reasons
        if let Some(canonical) = error.get("status").and_then(|v| v.as_str()) {
            reasons.push(canonical.to_string());
        }

        Self {
            status,
            message,
            reasons,
        }
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }
}

/// Errors raised by the REST layer
#[derive(Debug, Error)]
pub enum GcpError {
    /// GCP answered with a non-success status
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to get access token: {0}")]
    Auth(#[from] gcp_auth::Error),

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    /// Operation scope this crate cannot poll (regional operations)
    #[error("{0}")]
    UnsupportedScope(String),

    /// Response is missing a field the protocol relies on
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Operation reached DONE but reported errors
    #[error("Operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    /// The resource kind does not support this call
    #[error("{0} is not supported")]
    Unsupported(String),
}

impl GcpError {
    /// The structured remote error, if this is one
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            GcpError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

/// Outcome a lifecycle operation reports to the host orchestrator
#[derive(Debug, Error)]
pub enum OperationError {
    /// Ask the host to re-invoke the operation after `delay`
    #[error("{message} (retry in {}s)", delay.as_secs())]
    Retry { message: String, delay: Duration },

    /// Abort the operation; the host must not retry
    #[error("{0}")]
    NonRecoverable(String),
}

impl OperationError {
    pub fn non_recoverable(message: impl Into<String>) -> Self {
        OperationError::NonRecoverable(message.into())
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, OperationError::Retry { .. })
    }
}

pub type OperationResult<T = ()> = std::result::Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_decodes_reasons() {
        let body = r#"{
            "error": {
                "code": 400,
                "message": "The network resource 'net' is already being used by 'fw'",
                "errors": [{"domain": "global", "reason": "resourceInUseByAnotherResource"}]
            }
        }"#;

        let err = RemoteError::from_body(400, body);
        assert_eq!(err.status, 400);
        assert!(err.message.contains("already being used"));
        assert!(err.has_reason("resourceInUseByAnotherResource"));
    }

    #[test]
    fn test_remote_error_keeps_non_json_body() {
        let err = RemoteError::from_body(502, "  Bad Gateway \n");
        assert_eq!(err.message, "Bad Gateway");
        assert!(err.reasons.is_empty());
    }

    #[test]
    fn test_remote_error_reads_canonical_status() {
        let body = r#"{"error": {"code": 409, "message": "exists", "status": "ALREADY_EXISTS"}}"#;
        let err = RemoteError::from_body(409, body);
        assert!(err.has_reason("ALREADY_EXISTS"));
    }
}
