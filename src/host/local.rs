//! Local host
//!
//! Plays the orchestrator's role for the command line: keeps one JSON file
//! per node instance in a state directory, resolves relationships against
//! those files, persists runtime properties after every invocation and
//! honours retry signals by sleeping and invoking again.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{NodeContext, RelatedInstance, Relationship, RuntimeProperties};
use crate::error::OperationError;
use crate::gcp::client::GcpClient;
use crate::resource::dispatch;

/// Persisted state of one node instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub node_id: String,
    pub node_type: String,
    pub instance_id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub runtime_properties: RuntimeProperties,
}

/// `{node_id}_{6 hex characters}`
pub fn new_instance_id(node_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", node_id, &suffix[..6])
}

/// Requested edge from the node being operated on to another node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipArg {
    pub kind: String,
    pub target_node_id: String,
}

impl std::str::FromStr for RelationshipArg {
    type Err = String;

    /// Parse `kind=node_id`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((kind, target)) if !kind.is_empty() && !target.is_empty() => Ok(Self {
                kind: kind.to_string(),
                target_node_id: target.to_string(),
            }),
            _ => Err(format!("expected kind=node_id, got '{}'", s)),
        }
    }
}

pub struct LocalHost {
    state_dir: PathBuf,
    task_retries: u32,
    /// Overrides the delay carried by retry signals
    retry_interval: Option<Duration>,
    provider_context: Map<String, Value>,
}

impl LocalHost {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            task_retries: 0,
            retry_interval: None,
            provider_context: Map::new(),
        }
    }

    pub fn with_task_retries(mut self, task_retries: u32) -> Self {
        self.task_retries = task_retries;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Option<Duration>) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_provider_context(mut self, provider_context: Map<String, Value>) -> Self {
        self.provider_context = provider_context;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self, node_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", node_id))
    }

    pub fn load(&self, node_id: &str) -> Result<Option<InstanceState>> {
        let path = self.state_path(node_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &InstanceState) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("Failed to create {}", self.state_dir.display()))?;

        let path = self.state_path(&state.node_id);
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!("Saved state of {} to {}", state.node_id, path.display());
        Ok(())
    }

    /// Existing instance of `node_id` with refreshed properties, or a new one
    pub fn instance(&self, node_id: &str, node_type: &str, properties: Map<String, Value>) -> Result<InstanceState> {
        match self.load(node_id)? {
            Some(mut state) => {
                if state.node_type != node_type {
                    bail!(
                        "Node {} exists with type {}, not {}",
                        node_id,
                        state.node_type,
                        node_type
                    );
                }
                state.properties = properties;
                Ok(state)
            },
            None => {
                let instance_id = new_instance_id(node_id);
                tracing::info!("New instance {} of node {}", instance_id, node_id);
                Ok(InstanceState {
                    node_id: node_id.to_string(),
                    node_type: node_type.to_string(),
                    instance_id,
                    properties,
                    runtime_properties: RuntimeProperties::default(),
                })
            },
        }
    }

    /// Build the invocation context, resolving each edge to the target's
    /// current state
    pub fn context(&self, state: &InstanceState, relationships: &[RelationshipArg]) -> Result<NodeContext> {
        let mut ctx = NodeContext::new(&state.node_id, &state.node_type, &state.instance_id)
            .with_properties(state.properties.clone())
            .with_runtime_properties(state.runtime_properties.clone())
            .with_provider_context(self.provider_context.clone());

        for arg in relationships {
            let Some(target) = self.load(&arg.target_node_id)? else {
                bail!(
                    "Relationship target {} has no state in {}",
                    arg.target_node_id,
                    self.state_dir.display()
                );
            };
            ctx = ctx.with_relationship(Relationship {
                kind: arg.kind.clone(),
                target: RelatedInstance {
                    node_id: target.node_id,
                    node_type: target.node_type,
                    instance_id: target.instance_id,
                    runtime_properties: target.runtime_properties,
                },
            });
        }

        Ok(ctx)
    }

    /// Invoke `operation` until it succeeds, fails terminally, or runs out of
    /// retries. State is saved after every invocation.
    pub async fn run(
        &self,
        mut state: InstanceState,
        operation: &str,
        relationships: &[RelationshipArg],
        client: &GcpClient,
    ) -> Result<InstanceState> {
        let mut attempt = 0;

        loop {
            let mut ctx = self.context(&state, relationships)?;
            let node_type = state.node_type.clone();
            let result = dispatch::execute_operation(&node_type, operation, &mut ctx, client).await;

            state.runtime_properties = ctx.into_runtime();
            self.save(&state)?;

            match result {
                Ok(()) => {
                    tracing::info!("{} {} finished", operation, state.node_id);
                    return Ok(state);
                },
                Err(OperationError::Retry { message, delay }) if attempt < self.task_retries => {
                    attempt += 1;
                    let wait = self.retry_interval.unwrap_or(delay);
                    tracing::info!(
                        "{} {}: {} (attempt {}/{}, waiting {}s)",
                        operation,
                        state.node_id,
                        message,
                        attempt,
                        self.task_retries,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                },
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("{} of {} {} failed", operation, node_type, state.node_id)));
                },
            }
        }
    }
}
