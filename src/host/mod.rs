//! Host orchestrator interface
//!
//! Every lifecycle operation receives a [`NodeContext`]: the declared
//! properties of the node, the runtime properties of the current instance,
//! and its outgoing relationships. Runtime properties are the only state that
//! survives between invocations; the host persists them after every call,
//! including calls that end in a retry or a failure.

pub mod local;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::constants::{RESOURCE_ID, USE_EXTERNAL_RESOURCE};
use crate::error::OperationError;

/// Key-value store scoped to one node instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeProperties {
    values: Map<String, Value>,
}

impl RuntimeProperties {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Copy every top-level field of a JSON object into the store
    pub fn merge(&mut self, body: &Value) {
        if let Some(fields) = body.as_object() {
            for (key, value) in fields {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Another node instance reachable through a typed edge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedInstance {
    pub node_id: String,
    pub node_type: String,
    pub instance_id: String,
    #[serde(default)]
    pub runtime_properties: RuntimeProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: String,
    pub target: RelatedInstance,
}

/// Everything a lifecycle operation may read or write about its node
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    pub node_id: String,
    pub node_type: String,
    pub instance_id: String,
    properties: Map<String, Value>,
    runtime: RuntimeProperties,
    relationships: Vec<Relationship>,
    provider_context: Map<String, Value>,
}

impl NodeContext {
    pub fn new(node_id: &str, node_type: &str, instance_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            instance_id: instance_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_runtime_properties(mut self, runtime: RuntimeProperties) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_provider_context(mut self, provider_context: Map<String, Value>) -> Self {
        self.provider_context = provider_context;
        self
    }

    // Declared properties

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Whether the node refers to a resource this system does not own
    pub fn use_external_resource(&self) -> bool {
        self.properties
            .get(USE_EXTERNAL_RESOURCE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Configured identifier of the external resource
    pub fn resource_id(&self) -> Option<&str> {
        self.property_str(RESOURCE_ID)
    }

    pub fn provider_context(&self) -> &Map<String, Value> {
        &self.provider_context
    }

    // Runtime properties

    pub fn runtime(&self) -> &RuntimeProperties {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut RuntimeProperties {
        &mut self.runtime
    }

    pub fn into_runtime(self) -> RuntimeProperties {
        self.runtime
    }

    // Relationships

    /// Relationships of this instance, optionally filtered by relationship
    /// type and by target node type
    pub fn relationships(&self, kind: Option<&str>, target_type: Option<&str>) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|rel| kind.map_or(true, |k| rel.kind == k))
            .filter(|rel| target_type.map_or(true, |t| rel.target.node_type == t))
            .collect()
    }

    /// Build the host's "retry after `delay`" signal
    pub fn retry(&self, message: impl Into<String>, delay: Duration) -> OperationError {
        let message = message.into();
        tracing::warn!(
            "{} ({}): {}, retrying in {}s",
            self.node_id,
            self.instance_id,
            message,
            delay.as_secs()
        );
        OperationError::Retry { message, delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relationship(kind: &str, node_type: &str, node_id: &str) -> Relationship {
        Relationship {
            kind: kind.to_string(),
            target: RelatedInstance {
                node_id: node_id.to_string(),
                node_type: node_type.to_string(),
                instance_id: format!("{}_abc123", node_id),
                runtime_properties: RuntimeProperties::default(),
            },
        }
    }

    #[test]
    fn test_relationship_filters() {
        let ctx = NodeContext::new("fw", "firewall_rule", "fw_123456")
            .with_relationship(relationship("contained_in_network", "network", "net"))
            .with_relationship(relationship("depends_on", "dns_zone", "zone"));

        assert_eq!(ctx.relationships(None, None).len(), 2);
        assert_eq!(ctx.relationships(Some("contained_in_network"), None).len(), 1);
        assert_eq!(ctx.relationships(None, Some("dns_zone"))[0].target.node_id, "zone");
        assert!(ctx
            .relationships(Some("contained_in_network"), Some("dns_zone"))
            .is_empty());
    }

    #[test]
    fn test_external_flag_defaults_to_false() {
        let ctx = NodeContext::new("n", "network", "n_1");
        assert!(!ctx.use_external_resource());

        let ctx = ctx
            .with_property("use_external_resource", true)
            .with_property("resource_id", "existing-net");
        assert!(ctx.use_external_resource());
        assert_eq!(ctx.resource_id(), Some("existing-net"));
    }

    #[test]
    fn test_runtime_merge_and_remove() {
        let mut runtime = RuntimeProperties::default();
        runtime.insert("name", "net");
        runtime.merge(&json!({"selfLink": "link", "name": "net-2"}));

        assert_eq!(runtime.get_str("name"), Some("net-2"));
        assert_eq!(runtime.get_str("selfLink"), Some("link"));
        assert_eq!(runtime.remove("name"), Some(json!("net-2")));
        assert!(!runtime.contains_key("name"));
    }

    #[test]
    fn test_retry_signal_carries_delay() {
        let ctx = NodeContext::new("sg", "security_group", "sg_1");
        let err = ctx.retry("Rules not yet created", Duration::from_secs(5));
        match err {
            OperationError::Retry { message, delay } => {
                assert_eq!(message, "Rules not yet created");
                assert_eq!(delay, Duration::from_secs(5));
            },
            other => panic!("expected retry, got {other:?}"),
        }
    }
}
