//! GCP Authentication
//!
//! Resolves access tokens from a service account key carried in `gcp_config`,
//! from Application Default Credentials, or from a fixed token.

use anyhow::{Context, Result};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::GcpError;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
enum TokenSource {
    Provider(Arc<dyn TokenProvider>),
    Static(String),
}

/// GCP credentials holder with token caching
#[derive(Clone)]
pub struct GcpCredentials {
    source: TokenSource,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl GcpCredentials {
    /// Build credentials from the optional `auth` block of `gcp_config`.
    ///
    /// A service account key object is used as-is; without one, Application
    /// Default Credentials are looked up.
    pub async fn from_auth(auth: Option<&Value>) -> Result<Self> {
        let provider: Arc<dyn TokenProvider> = match auth {
            Some(key) if key.is_object() => {
                let json = serde_json::to_string(key).context("Failed to encode service account key")?;
                let account = CustomServiceAccount::from_json(&json)
                    .context("Failed to load service account key from gcp_config.auth")?;
                Arc::new(account)
            },
            _ => gcp_auth::provider().await.context(
                "Failed to initialize GCP authentication. Run 'gcloud auth application-default login'",
            )?,
        };

        Ok(Self {
            source: TokenSource::Provider(provider),
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Credentials that always present the same bearer token
    pub fn from_static(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an access token for API calls, reusing the cached one while valid
    pub async fn get_token(&self) -> Result<String, GcpError> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Provider(provider) => provider,
        };

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = provider.token(DEFAULT_SCOPES).await?;
        let token_str = token.as_str().to_string();

        let expires_at = Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;
        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token_str.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token_str)
    }
}

/// Get the gcloud configuration directory
pub fn get_gcloud_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(path));
    }

    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Validate a GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    match project.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {},
        _ => return false,
    }

    if project.ends_with('-') {
        return false;
    }

    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Read `key` from `[section]` of an ini-style gcloud configuration file
fn read_gcloud_property(content: &str, section: &str, key: &str) -> Option<String> {
    let header = format!("[{}]", section);
    let mut in_section = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = line == header;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((name, value)) = line.split_once('=') {
            if name.trim() == key {
                return Some(value.trim().to_string());
            }
        }
    }

    None
}

/// Contents of the active gcloud configuration file
fn active_gcloud_configuration() -> Option<String> {
    let config_dir = get_gcloud_config_dir()?;
    let active_config = std::fs::read_to_string(config_dir.join("active_config")).ok()?;
    let config_name = active_config.trim();

    // Security: Validate config name to prevent path traversal
    if !config_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let config_path = config_dir
        .join("configurations")
        .join(format!("config_{}", config_name));
    std::fs::read_to_string(config_path).ok()
}

/// Default project from the environment or the active gcloud configuration
pub fn get_default_project() -> Option<String> {
    for var in ["CLOUDSDK_CORE_PROJECT", "GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"] {
        if let Ok(project) = std::env::var(var) {
            if validate_project_id(&project) {
                return Some(project);
            }
            tracing::warn!("Invalid project ID format in {}", var);
        }
    }

    active_gcloud_configuration()
        .and_then(|content| read_gcloud_property(&content, "core", "project"))
        .filter(|project| validate_project_id(project))
}

/// Default zone from the environment or the active gcloud configuration
pub fn get_default_zone() -> Option<String> {
    if let Ok(zone) = std::env::var("CLOUDSDK_COMPUTE_ZONE") {
        return Some(zone);
    }

    active_gcloud_configuration()
        .and_then(|content| read_gcloud_property(&content, "compute", "zone"))
}
