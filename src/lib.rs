//! Lifecycle operations for GCP resources driven by a declarative
//! orchestrator.
//!
//! The orchestrator invokes `create`, `configure` and `delete` on each node
//! and re-invokes an operation when asked to retry. Long-running GCP
//! operations are therefore tracked in the node's runtime properties rather
//! than waited for, see [`lifecycle`].

pub mod config;
pub mod constants;
pub mod error;
pub mod gcp;
pub mod host;
pub mod lifecycle;
pub mod resource;

pub use error::{GcpError, OperationError, OperationResult};
