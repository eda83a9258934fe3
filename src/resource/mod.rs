//! Resource abstraction layer
//!
//! Each GCP resource kind is an independent struct holding a
//! [`ResourceHandle`] and implementing [`RestResource`]: one REST call per
//! method, returning the raw decoded response.
//!
//! # Architecture
//!
//! - [`network`] - VPC networks
//! - [`firewall`] - Firewall rules and security groups built from them
//! - [`url_map`] - URL maps
//! - [`dns`] - Cloud DNS managed zones and record sets
//! - [`fetcher`] - Paginated listing helpers
//! - [`dispatch`] - Maps node types and operation names to lifecycle functions

pub mod dispatch;
pub mod dns;
pub mod fetcher;
pub mod firewall;
pub mod network;
pub mod url_map;

use serde_json::Value;

use crate::error::GcpError;
use crate::gcp::client::GcpClient;

/// Identity of one remote GCP object.
///
/// Every kind managed here is global; zonal placement only shows up on the
/// operations GCP returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHandle {
    /// Already normalized; never changes once the resource exists
    pub name: String,
    pub project: String,
    /// Owned elsewhere: created by fetching, never deleted
    pub external: bool,
    /// Last body fetched from GCP
    pub body: Option<Value>,
}

impl ResourceHandle {
    pub fn global(name: &str, project: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            external: false,
            body: None,
        }
    }

    pub fn with_external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }
}

/// REST capabilities of a resource kind
#[allow(async_fn_in_trait)]
pub trait RestResource {
    /// Human readable kind used in logs and error messages
    const KIND: &'static str;

    fn handle(&self) -> &ResourceHandle;

    fn handle_mut(&mut self) -> &mut ResourceHandle;

    fn name(&self) -> &str {
        &self.handle().name
    }

    /// "firewall rule web-80" style label for messages
    fn describe(&self) -> String {
        format!("{} {}", Self::KIND, self.name())
    }

    /// Request body for create/update; deterministic for the same fields
    fn to_representation(&self) -> Value;

    async fn create(&self, client: &GcpClient) -> Result<Value, GcpError>;

    async fn get(&self, client: &GcpClient) -> Result<Value, GcpError>;

    async fn delete(&self, client: &GcpClient) -> Result<Value, GcpError>;

    /// Every item of the collection the resource lives in, across pages
    async fn list(&self, client: &GcpClient) -> Result<Vec<Value>, GcpError>;

    async fn update(&self, _client: &GcpClient) -> Result<Value, GcpError> {
        Err(GcpError::Unsupported(format!("update of {}", Self::KIND)))
    }

    /// Absorb a body fetched from GCP (external resources)
    fn update_model(&mut self, body: Value) {
        self.handle_mut().body = Some(body);
    }
}

/// Mutating call issued for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Verb::Create => "created",
            Verb::Update => "updated",
            Verb::Delete => "deleted",
        }
    }

    pub async fn invoke<R: RestResource>(self, resource: &R, client: &GcpClient) -> Result<Value, GcpError> {
        match self {
            Verb::Create => resource.create(client).await,
            Verb::Update => resource.update(client).await,
            Verb::Delete => resource.delete(client).await,
        }
    }
}
