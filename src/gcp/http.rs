//! HTTP utilities for GCP REST API calls

use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::{GcpError, RemoteError};

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate long responses and drop control characters before logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    pub fn new() -> Result<Self, GcpError> {
        let client = Client::builder()
            .user_agent(concat!("gcp-lifecycle/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value, GcpError> {
        self.execute(Method::GET, url, token, None).await
    }

    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value, GcpError> {
        self.execute(Method::POST, url, token, body).await
    }

    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<Value, GcpError> {
        self.execute(Method::PUT, url, token, Some(body)).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value, GcpError> {
        self.execute(Method::DELETE, url, token, None).await
    }

    /// Issue one request and decode the JSON answer.
    ///
    /// Non-success statuses become [`RemoteError`] with the payload's message and
    /// reasons; an empty success body decodes to `Value::Null`.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, GcpError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_body = response.text().await?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(RemoteError::from_body(status.as_u16(), &response_body).into());
        }

        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&response_body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
        assert!(sanitized.len() < body.len());
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }
}
