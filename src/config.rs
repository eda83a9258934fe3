//! Configuration Management
//!
//! [`GcpConfig`] is resolved for every lifecycle invocation from the node's
//! declared properties or the host provider context. [`Config`] holds the
//! local runner's persisted defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{GCP_CONFIG, GCP_ZONE, RETRY_DEFAULT_DELAY, RETRY_DELAY};
use crate::error::{OperationError, OperationResult};
use crate::gcp::auth;
use crate::host::NodeContext;

fn default_network() -> String {
    "default".to_string()
}

/// Project, zone, default network and credentials for GCP calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcpConfig {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Service account key; Application Default Credentials when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            zone: String::new(),
            network: default_network(),
            auth: None,
        }
    }
}

impl GcpConfig {
    /// Resolve the configuration for the current invocation.
    ///
    /// Node property `gcp_config` wins over the provider context's
    /// `resources.gcp_config`; a `zone` runtime property overrides the zone.
    pub fn resolve(ctx: &NodeContext) -> OperationResult<Self> {
        let from_properties = ctx
            .property(GCP_CONFIG)
            .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()));

        let raw = match from_properties {
            Some(raw) => raw.clone(),
            None => ctx
                .provider_context()
                .get("resources")
                .and_then(|r| r.get(GCP_CONFIG))
                .cloned()
                .ok_or_else(|| {
                    OperationError::non_recoverable(format!(
                        "{} not provided as a property and the provider context is not set up either",
                        GCP_CONFIG
                    ))
                })?,
        };

        let mut config: GcpConfig = serde_json::from_value(raw).map_err(|e| {
            OperationError::non_recoverable(format!("Invalid {}: {}", GCP_CONFIG, e))
        })?;

        if let Some(zone) = ctx.runtime().get_str(GCP_ZONE).filter(|z| !z.is_empty()) {
            config.zone = zone.to_string();
        }

        if config.project.is_empty() {
            config.project = auth::get_default_project().ok_or_else(|| {
                OperationError::non_recoverable(format!(
                    "{}.project is missing and no gcloud default project is configured",
                    GCP_CONFIG
                ))
            })?;
        }

        if config.zone.is_empty() {
            if let Some(zone) = auth::get_default_zone() {
                config.zone = zone;
            }
        }

        Ok(config)
    }
}

/// Delay to request from the host when retrying; node property
/// `retry_delay` (seconds, at least 1) overrides the default
pub fn retry_delay(ctx: &NodeContext) -> Duration {
    ctx.property(RETRY_DELAY)
        .and_then(|v| v.as_u64())
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or(RETRY_DEFAULT_DELAY)
}

/// Persisted defaults of the local runner
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Project used when `gcp_config.project` is empty
    #[serde(default)]
    pub project_id: Option<String>,
    /// Zone used when `gcp_config.zone` is empty
    #[serde(default)]
    pub zone: Option<String>,
    /// Directory holding node instance state
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcp-lifecycle").join("config.json"))
    }

    /// Load configuration from disk, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// State directory (config > user data dir > ./.gcp-lifecycle)
    pub fn effective_state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("gcp-lifecycle").join("instances")))
            .unwrap_or_else(|| PathBuf::from(".gcp-lifecycle"))
    }

    /// Fill empty project and zone of `gcp_config` from these defaults
    pub fn apply_defaults(&self, gcp_config: &mut Value) {
        let Some(fields) = gcp_config.as_object_mut() else {
            return;
        };

        for (key, default) in [("project", &self.project_id), ("zone", &self.zone)] {
            let empty = fields
                .get(key)
                .and_then(|v| v.as_str())
                .map_or(true, str::is_empty);
            if let (true, Some(default)) = (empty, default) {
                fields.insert(key.to_string(), Value::String(default.clone()));
            }
        }
    }
}
