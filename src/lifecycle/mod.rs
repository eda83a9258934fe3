//! Asynchronous operation reconciliation
//!
//! GCP answers mutating calls immediately with an operation that completes
//! later. The host orchestrator re-invokes a lifecycle operation when asked
//! to retry, so there are two ways to wait for completion and they stay
//! separate:
//!
//! - blocking: [`crate::gcp::operation::Operation::wait`], only where the
//!   host cannot come back later
//! - host retry: [`pending`] for one resource, [`reconcile`] for a batch
//!
//! [`classify`] decides which REST failures become retries, and
//! [`external`] short-circuits nodes that point at resources owned elsewhere.

pub mod classify;
pub mod external;
pub mod pending;
pub mod reconcile;

pub use classify::{classify, is_object_deleted, ErrorClass, RetryPolicy};
pub use external::{create_resource, delete_if_not_external, resolve_name, CreateOutcome};
pub use reconcile::{handle_multiple_calls, ReconciliationBatch};
