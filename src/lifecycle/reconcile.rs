//! Multi-resource reconciliation
//!
//! Drives several independent resource operations (for example the firewall
//! rules making up a security group) to completion without blocking. Each
//! invocation issues or polls every operation once, persists what it learned
//! in the `_operations` runtime property, and asks the host to retry while
//! anything is unfinished.
//!
//! Callers must pass the same resources in the same order on every
//! re-invocation. Entries are correlated by resource name; a changed set is
//! not detected beyond a warning.

use serde_json::{json, Map, Value};

use super::classify::{classify, terminal, ErrorClass, RetryPolicy};
use crate::constants::OPERATIONS;
use crate::error::{GcpError, OperationError, OperationResult};
use crate::gcp::client::GcpClient;
use crate::gcp::operation::{is_done, operation_error, operation_scope, Operation};
use crate::host::NodeContext;
use crate::resource::{RestResource, Verb};

/// Resource name -> last known operation response, persisted across retries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationBatch {
    entries: Map<String, Value>,
}

impl ReconciliationBatch {
    pub fn load(ctx: &NodeContext) -> OperationResult<Self> {
        match ctx.runtime().get(OPERATIONS) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(entries)) => Ok(Self {
                entries: entries.clone(),
            }),
            Some(other) => Err(OperationError::non_recoverable(format!(
                "Runtime property {} is corrupt: expected an object, found {}",
                OPERATIONS, other
            ))),
        }
    }

    pub fn store(&self, ctx: &mut NodeContext) {
        ctx.runtime_mut()
            .insert(OPERATIONS, Value::Object(self.entries.clone()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn record(&mut self, name: &str, response: Value) {
        self.entries.insert(name.to_string(), response);
    }

    pub fn forget(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn is_done(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(is_done)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

/// What one pass learned about one resource
enum Step {
    Recorded(Value),
    /// Conflict; nothing recorded, try again next invocation
    Deferred,
}

/// Drive `verb` on every resource until all of them are `DONE`.
///
/// Each resource gets at most one mutating call over the whole life of the
/// batch: once its operation is recorded it is only polled. Returns `Ok(())`
/// when every entry is `DONE`, a retry signal naming the unfinished resources
/// otherwise, or a terminal error as soon as one call fails for a reason other
/// than a conflict. Progress made before that point is persisted in every case.
pub async fn handle_multiple_calls<R: RestResource>(
    ctx: &mut NodeContext,
    client: &GcpClient,
    resources: &[R],
    verb: Verb,
    policy: &RetryPolicy,
) -> OperationResult {
    let mut batch = ReconciliationBatch::load(ctx)?;

    let unknown: Vec<&String> = batch
        .names()
        .filter(|name| !resources.iter().any(|r| r.name() == name.as_str()))
        .collect();
    if !unknown.is_empty() {
        tracing::warn!(
            "{}: recorded operations {:?} do not match any resource of this call",
            ctx.node_id,
            unknown
        );
    }

    let mut failure = None;

    for resource in resources {
        let name = resource.name();

        let step = match batch.get(name) {
            Some(response) if is_done(response) => {
                tracing::debug!("{} already {}", resource.describe(), verb.past_tense());
                continue;
            },
            Some(response) => poll_recorded(response, client).await,
            None => issue(resource, verb, client).await,
        };

        match step {
            Ok(Step::Recorded(response)) => {
                if is_done(&response) {
                    if let Some(message) = operation_error(&response) {
                        // Dropped so a later run issues the call again
                        batch.forget(name);
                        failure = Some(OperationError::non_recoverable(format!(
                            "{} failed to {}: {}",
                            resource.describe(),
                            verb.as_str(),
                            message
                        )));
                        break;
                    }
                }
                batch.record(name, response);
            },
            Ok(Step::Deferred) => {},
            Err(error) => {
                failure = Some(terminal(&resource.describe(), &error));
                break;
            },
        }
    }

    batch.store(ctx);

    if let Some(failure) = failure {
        return Err(failure);
    }

    let not_done: Vec<&str> = resources
        .iter()
        .map(|r| r.name())
        .filter(|name| !batch.is_done(name))
        .collect();

    if !not_done.is_empty() {
        return Err(ctx.retry(
            format!("Rules {:?} not yet {}", not_done, verb.past_tense()),
            policy.delay,
        ));
    }

    tracing::info!(
        "{}: all {} resources {}",
        ctx.node_id,
        resources.len(),
        verb.past_tense()
    );
    Ok(())
}

/// Refresh a recorded, unfinished operation once
async fn poll_recorded(response: &Value, client: &GcpClient) -> Result<Step, GcpError> {
    let mut operation = Operation::from_response(response, &client.project_id)?;
    match operation.poll(client).await {
        Ok(latest) => Ok(Step::Recorded(latest.clone())),
        Err(error) if classify(&error) == ErrorClass::ResourceInUse => Ok(Step::Deferred),
        Err(error) => Err(error),
    }
}

/// Issue the mutating call for a resource not yet in the batch
async fn issue<R: RestResource>(resource: &R, verb: Verb, client: &GcpClient) -> Result<Step, GcpError> {
    tracing::info!("Issuing {} of {}", verb.as_str(), resource.describe());

    match verb.invoke(resource, client).await {
        // Empty body: the call completed synchronously
        Ok(Value::Null) => Ok(Step::Recorded(json!({
            "name": resource.name(),
            "status": "DONE",
        }))),
        Ok(response) => {
            if !is_done(&response) {
                operation_scope(&response)?;
            }
            Ok(Step::Recorded(response))
        },
        Err(error) => match (classify(&error), verb) {
            (ErrorClass::ResourceInUse, _) => {
                tracing::info!("{} is in use, deferring: {}", resource.describe(), error);
                Ok(Step::Deferred)
            },
            (ErrorClass::MissingResource, Verb::Delete) => {
                tracing::info!("{} is already gone", resource.describe());
                Ok(Step::Recorded(json!({
                    "name": resource.name(),
                    "status": "DONE",
                })))
            },
            _ => Err(error),
        },
    }
}
