//! GCP API interaction module
//!
//! REST plumbing shared by every resource kind.
//!
//! # Module Structure
//!
//! - [`auth`] - Service account, Application Default or static credentials
//! - [`client`] - Main GCP client and endpoint URL helpers
//! - [`http`] - HTTP utilities for REST API calls
//! - [`naming`] - GCP resource naming rules
//! - [`operation`] - Polling of asynchronous Compute Engine operations
//!
//! # Example
//!
//! ```ignore
//! use gcp_lifecycle::gcp::{client::GcpClient, operation::Operation};
//!
//! async fn example(client: &GcpClient, body: &serde_json::Value) -> anyhow::Result<()> {
//!     let url = client.compute_global_url(&client.project_id, "firewalls");
//!     let response = client.post(&url, Some(body)).await?;
//!     Operation::from_response(&response, &client.project_id)?.wait(client).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod naming;
pub mod operation;
