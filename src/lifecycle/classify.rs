//! Retry classification
//!
//! REST failures are sorted into three classes, based on the status code and
//! the structured reasons in the error payload:
//!
//! - missing resource (404, `notFound`)
//! - resource in use / conflict (409, `resourceInUseByAnotherResource`,
//!   `resourceNotReady`, quota and rate contention)
//! - anything else
//!
//! [`RetryPolicy::check`] is the single point where a REST result becomes
//! either a value, a host retry signal, or a terminal failure.

use std::time::Duration;

use crate::config::retry_delay;
use crate::constants::RETRY_DEFAULT_DELAY;
use crate::error::{GcpError, OperationError, OperationResult};
use crate::gcp::client::GcpClient;
use crate::host::NodeContext;
use crate::resource::RestResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    MissingResource,
    ResourceInUse,
    Other,
}

const MISSING_REASONS: &[&str] = &["notFound", "NOT_FOUND"];

const IN_USE_REASONS: &[&str] = &[
    "resourceInUseByAnotherResource",
    "resourceNotReady",
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "ABORTED",
];

pub fn classify(error: &GcpError) -> ErrorClass {
    let Some(remote) = error.remote() else {
        return ErrorClass::Other;
    };

    if remote.status == 404 || MISSING_REASONS.iter().any(|r| remote.has_reason(r)) {
        return ErrorClass::MissingResource;
    }

    if remote.status == 409 || IN_USE_REASONS.iter().any(|r| remote.has_reason(r)) {
        return ErrorClass::ResourceInUse;
    }

    ErrorClass::Other
}

pub fn is_missing_resource_error(error: &GcpError) -> bool {
    classify(error) == ErrorClass::MissingResource
}

/// Terminal failure naming the resource and the underlying cause
pub fn terminal(resource: &str, error: &GcpError) -> OperationError {
    OperationError::non_recoverable(format!("{}: {}", resource, error))
}

const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How conflicts are turned into host retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: RETRY_DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Retry signals always carry a positive delay
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: delay.max(MIN_RETRY_DELAY),
        }
    }

    pub fn for_node(ctx: &NodeContext) -> Self {
        Self::new(retry_delay(ctx))
    }

    /// Map a REST result for `resource`: conflicts ask the host to retry with
    /// `retry_message`, every other error is terminal
    pub fn check<T>(
        &self,
        ctx: &NodeContext,
        resource: &str,
        result: Result<T, GcpError>,
        retry_message: &str,
    ) -> OperationResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => Err(self.map_error(ctx, resource, &error, retry_message)),
        }
    }

    pub fn map_error(
        &self,
        ctx: &NodeContext,
        resource: &str,
        error: &GcpError,
        retry_message: &str,
    ) -> OperationError {
        match classify(error) {
            ErrorClass::ResourceInUse => {
                tracing::info!("{} is in use: {}", resource, error);
                ctx.retry(retry_message, self.delay)
            },
            ErrorClass::MissingResource | ErrorClass::Other => terminal(resource, error),
        }
    }
}

/// True when fetching the resource reports it as missing
pub async fn is_object_deleted<R: RestResource>(resource: &R, client: &GcpClient) -> Result<bool, GcpError> {
    match resource.get(client).await {
        Ok(_) => Ok(false),
        Err(error) if is_missing_resource_error(&error) => Ok(true),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    fn remote(status: u16, reasons: &[&str]) -> GcpError {
        GcpError::Remote(RemoteError {
            status,
            message: "boom".to_string(),
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
        })
    }

    #[test]
    fn test_classify_missing() {
        assert_eq!(classify(&remote(404, &["notFound"])), ErrorClass::MissingResource);
        assert_eq!(classify(&remote(400, &["notFound"])), ErrorClass::MissingResource);
    }

    #[test]
    fn test_classify_in_use() {
        assert_eq!(classify(&remote(409, &[])), ErrorClass::ResourceInUse);
        assert_eq!(
            classify(&remote(400, &["resourceInUseByAnotherResource"])),
            ErrorClass::ResourceInUse
        );
        assert_eq!(classify(&remote(403, &["quotaExceeded"])), ErrorClass::ResourceInUse);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify(&remote(400, &["invalid"])), ErrorClass::Other);
        assert_eq!(classify(&remote(403, &["forbidden"])), ErrorClass::Other);
        assert_eq!(
            classify(&GcpError::UnsupportedScope("RegionOperation is not implemented".into())),
            ErrorClass::Other
        );
    }

    #[test]
    fn test_conflict_becomes_retry() {
        let ctx = NodeContext::new("fw", "firewall_rule", "fw_1");
        let policy = RetryPolicy::new(Duration::from_secs(7));
        let err = policy
            .check::<()>(&ctx, "firewall rule fw", Err(remote(409, &[])), "Retrying deleting firewall rule")
            .unwrap_err();

        match err {
            OperationError::Retry { message, delay } => {
                assert_eq!(message, "Retrying deleting firewall rule");
                assert!(delay > Duration::ZERO);
            },
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_delay_conflict_still_waits() {
        let ctx = NodeContext::new("fw", "firewall_rule", "fw_1");
        let err = RetryPolicy::new(Duration::ZERO).map_error(&ctx, "firewall rule fw", &remote(409, &[]), "retry");
        match err {
            OperationError::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(1)),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_request_is_terminal() {
        let ctx = NodeContext::new("fw", "firewall_rule", "fw_1");
        let err = RetryPolicy::default()
            .check::<()>(&ctx, "firewall rule fw", Err(remote(400, &["invalid"])), "retry")
            .unwrap_err();

        assert!(!err.is_retry());
        let message = err.to_string();
        assert!(message.contains("firewall rule fw"));
        assert!(message.contains("boom"));
    }
}
