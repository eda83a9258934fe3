//! Single-resource operations completed across host retries
//!
//! The response of a mutating call is stored in the `_operation` runtime
//! property, tagged with the verb that issued it, and the host is asked to
//! retry. Each later invocation of the same verb polls the stored operation
//! once instead of blocking.
//!
//! An operation left behind by another verb (a create the host gave up on,
//! then a delete) is discarded, so the requested call is still issued.

use serde_json::{json, Value};

use super::classify::{terminal, RetryPolicy};
use crate::constants::OPERATION;
use crate::error::{GcpError, OperationError, OperationResult};
use crate::gcp::client::GcpClient;
use crate::gcp::operation::{is_done, operation_error, operation_scope, Operation};
use crate::host::NodeContext;
use crate::resource::Verb;

const VERB: &str = "verb";
const RESPONSE: &str = "operation";

/// Operation stored for `verb`, if any. Entries of another verb are removed.
fn take_stored(ctx: &mut NodeContext, verb: Verb) -> Option<Value> {
    let stored = ctx.runtime().get(OPERATION).filter(|v| !v.is_null())?.clone();

    match (stored.get(VERB).and_then(|v| v.as_str()), stored.get(RESPONSE)) {
        (Some(tag), Some(response)) if tag == verb.as_str() => Some(response.clone()),
        (tag, _) => {
            tracing::warn!(
                "{}: discarding stored {} operation, {} was requested",
                ctx.node_id,
                tag.unwrap_or("untagged"),
                verb.as_str()
            );
            ctx.runtime_mut().remove(OPERATION);
            None
        },
    }
}

fn store(ctx: &mut NodeContext, verb: Verb, response: Value) {
    ctx.runtime_mut().insert(
        OPERATION,
        json!({ VERB: verb.as_str(), RESPONSE: response }),
    );
}

/// Poll the operation a previous invocation of `verb` left behind.
///
/// - nothing stored for `verb`: `Ok(None)`, the caller starts the work
/// - stored and now `DONE`: the key is cleared and the final payload returned
/// - stored and unfinished: the fresh response is stored and a retry signalled
/// - terminal failure: the key is cleared so a later run starts over
pub async fn poll_stored(
    ctx: &mut NodeContext,
    client: &GcpClient,
    policy: &RetryPolicy,
    verb: Verb,
    label: &str,
) -> OperationResult<Option<Value>> {
    let Some(stored) = take_stored(ctx, verb) else {
        return Ok(None);
    };

    match poll_once(ctx, client, policy, verb, label, &stored).await {
        Ok(Some(operation)) => {
            ctx.runtime_mut().remove(OPERATION);
            operation.check_error().map_err(|e| terminal(label, &e))?;
            Ok(Some(operation.last_response().clone()))
        },
        Ok(None) => Err(ctx.retry(format!("{} is not yet {}", label, verb.past_tense()), policy.delay)),
        Err(error) if error.is_retry() => Err(error),
        Err(error) => {
            ctx.runtime_mut().remove(OPERATION);
            Err(error)
        },
    }
}

/// One poll; `None` once the fresh response has been stored because the
/// operation is still running
async fn poll_once(
    ctx: &mut NodeContext,
    client: &GcpClient,
    policy: &RetryPolicy,
    verb: Verb,
    label: &str,
    stored: &Value,
) -> OperationResult<Option<Operation>> {
    let mut operation = Operation::from_response(stored, &client.project_id).map_err(|e| terminal(label, &e))?;

    let finished = operation.has_finished(client).await;
    let finished = policy.check(ctx, label, finished, &format!("{} is still in progress", label))?;

    if !finished {
        store(ctx, verb, operation.last_response().clone());
        return Ok(None);
    }

    Ok(Some(operation))
}

/// Continue with a freshly issued operation response: return if it is already
/// `DONE`, otherwise store it under `verb` and ask the host to come back
pub fn await_later(
    ctx: &mut NodeContext,
    verb: Verb,
    response: Value,
    policy: &RetryPolicy,
    message: &str,
) -> OperationResult {
    if response.is_null() || is_done(&response) {
        if let Some(error) = operation_error(&response) {
            return Err(OperationError::non_recoverable(format!("{}: {}", message, error)));
        }
        return Ok(());
    }

    if response.get("name").is_none() {
        return Err(terminal(
            message,
            &GcpError::MalformedResponse("operation response has no name".to_string()),
        ));
    }
    operation_scope(&response).map_err(|e| terminal(message, &e))?;

    store(ctx, verb, response);
    Err(ctx.retry(message, policy.delay))
}
