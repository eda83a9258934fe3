//! External resources and name resolution
//!
//! A node with `use_external_resource: true` refers to an object this system
//! does not own; its handle is marked external. Creating it only fetches and
//! validates the existing object; deleting it does nothing.

use serde_json::Value;

use super::classify::{is_missing_resource_error, terminal, RetryPolicy};
use crate::error::{OperationError, OperationResult};
use crate::gcp::client::GcpClient;
use crate::gcp::naming::{is_valid_name, normalize};
use crate::host::NodeContext;
use crate::resource::RestResource;

/// The configured external identifier, which must already be a valid GCP name
pub fn assure_resource_id_correct(ctx: &NodeContext) -> OperationResult<String> {
    let Some(resource_id) = ctx.resource_id() else {
        return Err(OperationError::non_recoverable("Resource id is missing."));
    };

    if !is_valid_name(resource_id) {
        return Err(OperationError::non_recoverable(format!(
            "{} cannot be used as resource id.",
            resource_id
        )));
    }

    Ok(resource_id.to_string())
}

/// Name of the resource this node manages.
///
/// External nodes use their resource id verbatim. Otherwise the declared name,
/// or the instance id when none is declared, is normalized.
pub fn resolve_name(ctx: &NodeContext, declared: Option<&str>) -> OperationResult<String> {
    if ctx.use_external_resource() {
        return assure_resource_id_correct(ctx);
    }

    Ok(match declared.filter(|name| !name.is_empty()) {
        Some(name) => normalize(name),
        None => normalize(&ctx.instance_id),
    })
}

/// Result of the create path
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// External resource fetched from GCP
    Existing(Value),
    /// Response of the create call (usually an operation)
    Issued(Value),
}

/// Create the resource, or fetch it when the node is external
pub async fn create_resource<R: RestResource>(
    ctx: &NodeContext,
    resource: &mut R,
    client: &GcpClient,
    policy: &RetryPolicy,
) -> OperationResult<CreateOutcome> {
    let label = resource.describe();

    if resource.handle().external {
        let resource_id = assure_resource_id_correct(ctx)?;

        return match resource.get(client).await {
            Ok(body) => {
                tracing::info!("Using external {}", label);
                resource.update_model(body.clone());
                Ok(CreateOutcome::Existing(body))
            },
            Err(error) if is_missing_resource_error(&error) => {
                Err(OperationError::non_recoverable(format!(
                    "Resource {} defined as external, but does not exist. Error: {}",
                    resource_id, error
                )))
            },
            Err(error) => Err(terminal(&label, &error)),
        };
    }

    tracing::info!("Creating {}", label);
    let response = policy.check(
        ctx,
        &label,
        resource.create(client).await,
        &format!("Retrying creating {}", label),
    )?;

    Ok(CreateOutcome::Issued(response))
}

/// Delete the resource unless it is external.
///
/// Returns the delete response, or `None` when nothing was issued (external,
/// or already gone).
pub async fn delete_if_not_external<R: RestResource>(
    ctx: &NodeContext,
    resource: &R,
    client: &GcpClient,
    policy: &RetryPolicy,
) -> OperationResult<Option<Value>> {
    let label = resource.describe();

    if resource.handle().external {
        tracing::info!("Not deleting external {}", label);
        return Ok(None);
    }

    tracing::info!("Deleting {}", label);
    match resource.delete(client).await {
        Ok(response) => Ok(Some(response)),
        Err(error) if is_missing_resource_error(&error) => {
            tracing::info!("{} is already gone", label);
            Ok(None)
        },
        Err(error) => Err(policy.map_error(ctx, &label, &error, &format!("Retrying deleting {}", label))),
    }
}
