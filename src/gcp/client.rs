//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality.

use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use crate::config::GcpConfig;
use crate::constants::{COMPUTE_ENDPOINT, DNS_ENDPOINT};
use crate::error::GcpError;

/// Base URLs of the REST services this crate talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: String,
    pub dns: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: COMPUTE_ENDPOINT.to_string(),
            dns: DNS_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    /// Serve every API from one host, keeping the usual path layout
    /// (`{base}/compute/v1`, `{base}/dns/v1`)
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            compute: format!("{}/compute/v1", base),
            dns: format!("{}/dns/v1", base),
        }
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub endpoints: Endpoints,
}

impl GcpClient {
    /// Create a client for the project and credentials in `config`
    pub async fn new(config: &GcpConfig) -> Result<Self> {
        let credentials = GcpCredentials::from_auth(config.auth.as_ref())
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(config, credentials)
    }

    pub fn with_credentials(config: &GcpConfig, credentials: GcpCredentials) -> Result<Self> {
        let http = GcpHttpClient::new().context("Failed to create HTTP client")?;

        Ok(Self {
            credentials,
            http,
            project_id: config.project.clone(),
            endpoints: Endpoints::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub async fn get_token(&self) -> Result<String, GcpError> {
        self.credentials.get_token().await
    }

    pub async fn get(&self, url: &str) -> Result<Value, GcpError> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value, GcpError> {
        let token = self.get_token().await?;
        self.http.post(url, &token, body).await
    }

    pub async fn put(&self, url: &str, body: &Value) -> Result<Value, GcpError> {
        let token = self.get_token().await?;
        self.http.put(url, &token, body).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value, GcpError> {
        let token = self.get_token().await?;
        self.http.delete(url, &token).await
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, project: &str, path: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.endpoints.compute,
            encode(project),
            path
        )
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, project: &str, resource: &str) -> String {
        self.compute_url(project, &format!("global/{}", resource))
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, project: &str, zone: &str, resource: &str) -> String {
        self.compute_url(project, &format!("zones/{}/{}", encode(zone), resource))
    }

    // =========================================================================
    // Cloud DNS API helpers
    // =========================================================================

    /// Build Cloud DNS API URL
    pub fn dns_url(&self, project: &str, path: &str) -> String {
        format!("{}/projects/{}/{}", self.endpoints.dns, encode(project), path)
    }

    /// Build Cloud DNS URL for a managed zone sub-resource
    pub fn dns_zone_url(&self, project: &str, zone: &str, resource: &str) -> String {
        let path = if resource.is_empty() {
            format!("managedZones/{}", encode(zone))
        } else {
            format!("managedZones/{}/{}", encode(zone), resource)
        };
        self.dns_url(project, &path)
    }
}

/// Percent-encode one path segment
pub fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Append query parameters, skipping those without a value
pub fn with_query(url: &str, params: &[(&str, Option<&str>)]) -> Result<String, GcpError> {
    let mut parsed = Url::parse(url)?;
    {
        let mut pairs = parsed.query_pairs_mut();
        for (key, value) in params {
            if let Some(value) = value {
                pairs.append_pair(key, value);
            }
        }
    }

    // Avoid a dangling '?' when nothing was appended
    if parsed.query() == Some("") {
        parsed.set_query(None);
    }

    Ok(parsed.to_string())
}

/// Short name from a full resource URL (`.../zones/us-central1-a` -> `us-central1-a`)
pub fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}
