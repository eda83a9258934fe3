//! Operation tracking
//!
//! Mutating Compute Engine calls answer with an Operation resource that
//! starts out `PENDING` or `RUNNING` and is polled until `DONE`. The endpoint
//! to poll depends on where the operation lives: a `zone` key in the response
//! means a zone operation, a `region` key a regional one (not supported),
//! and neither a global one.

use serde_json::Value;

use super::client::{encode, extract_short_name, GcpClient};
use crate::constants::{GCP_OP_DONE, OPERATION_POLL_INTERVAL};
use crate::error::GcpError;

/// Where an operation lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationScope {
    Global,
    Zonal { zone: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    Unknown(String),
}

impl OperationStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            GCP_OP_DONE => Self::Done,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Status recorded in an operation response, if any
pub fn response_status(response: &Value) -> Option<OperationStatus> {
    response
        .get("status")
        .and_then(|v| v.as_str())
        .map(OperationStatus::parse)
}

/// Whether a recorded operation response has reached `DONE`
pub fn is_done(response: &Value) -> bool {
    response_status(response) == Some(OperationStatus::Done)
}

/// Messages from the `error.errors[]` block of a finished operation
pub fn operation_error(response: &Value) -> Option<String> {
    let errors = response.get("error")?.get("errors")?.as_array()?;
    let messages: Vec<String> = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .or_else(|| e.get("code").and_then(|c| c.as_str()))
                .unwrap_or("unknown error")
                .to_string()
        })
        .collect();

    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

/// Where the operation in `response` must be polled
pub fn operation_scope(response: &Value) -> Result<OperationScope, GcpError> {
    if let Some(zone) = response.get("zone").and_then(|v| v.as_str()) {
        return Ok(OperationScope::Zonal {
            zone: extract_short_name(zone),
        });
    }

    if response.get("region").is_some() {
        return Err(GcpError::UnsupportedScope(
            "RegionOperation is not implemented".to_string(),
        ));
    }

    Ok(OperationScope::Global)
}

/// Tracker for one asynchronous GCP operation
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub project: String,
    pub scope: OperationScope,
    last_response: Value,
    last_status: Option<OperationStatus>,
}

impl Operation {
    /// Wrap the response of a mutating call.
    ///
    /// The response itself counts as the first observation, so an operation
    /// that was already `DONE` is never polled.
    pub fn from_response(response: &Value, project: &str) -> Result<Self, GcpError> {
        let name = response
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                GcpError::MalformedResponse("operation response has no name".to_string())
            })?
            .to_string();

        Ok(Self {
            name,
            project: project.to_string(),
            scope: operation_scope(response)?,
            last_status: response_status(response),
            last_response: response.clone(),
        })
    }

    pub fn last_response(&self) -> &Value {
        &self.last_response
    }

    pub fn last_status(&self) -> Option<&OperationStatus> {
        self.last_status.as_ref()
    }

    fn url(&self, client: &GcpClient) -> String {
        let path = format!("operations/{}", encode(&self.name));
        match &self.scope {
            OperationScope::Global => client.compute_global_url(&self.project, &path),
            OperationScope::Zonal { zone } => client.compute_zonal_url(&self.project, zone, &path),
        }
    }

    /// Fetch the current state of the operation
    pub async fn poll(&mut self, client: &GcpClient) -> Result<&Value, GcpError> {
        let response = client.get(&self.url(client)).await?;
        self.last_status = response_status(&response);
        self.last_response = response;
        tracing::debug!("Operation {} status: {:?}", self.name, self.last_status);
        Ok(&self.last_response)
    }

    /// True once the operation is `DONE`; polls when the last known status is not
    pub async fn has_finished(&mut self, client: &GcpClient) -> Result<bool, GcpError> {
        if self.last_status != Some(OperationStatus::Done) {
            self.poll(client).await?;
        }

        Ok(self.last_status == Some(OperationStatus::Done))
    }

    /// Fail if the finished operation reported errors
    pub fn check_error(&self) -> Result<(), GcpError> {
        match operation_error(&self.last_response) {
            Some(message) => Err(GcpError::OperationFailed {
                name: self.name.clone(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Block until the operation is `DONE` and return its final payload.
    ///
    /// Polls every second with no upper bound. Only for call sites where the
    /// host cannot re-invoke the operation later.
    pub async fn wait(mut self, client: &GcpClient) -> Result<Value, GcpError> {
        while !self.has_finished(client).await? {
            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
        }

        self.check_error()?;
        Ok(self.last_response)
    }
}
