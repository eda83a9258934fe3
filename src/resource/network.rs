//! VPC networks

use serde::Deserialize;
use serde_json::{json, Value};

use super::fetcher;
use super::{ResourceHandle, RestResource, Verb};
use crate::config::GcpConfig;
use crate::constants::{CONTAINED_IN_NETWORK, NAME, NETWORK_TYPE};
use crate::error::{GcpError, OperationResult};
use crate::gcp::client::{encode, GcpClient};
use crate::host::NodeContext;
use crate::lifecycle::{create_resource, delete_if_not_external, pending, resolve_name, CreateOutcome, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub handle: ResourceHandle,
    pub auto_subnets: bool,
    /// Legacy networks only
    pub iprange: Option<String>,
}

impl Network {
    pub fn new(handle: ResourceHandle, auto_subnets: bool) -> Self {
        Self {
            handle,
            auto_subnets,
            iprange: None,
        }
    }

    fn collection_url(&self, client: &GcpClient) -> String {
        client.compute_global_url(&self.handle.project, "networks")
    }

    fn item_url(&self, client: &GcpClient) -> String {
        client.compute_global_url(
            &self.handle.project,
            &format!("networks/{}", encode(&self.handle.name)),
        )
    }
}

impl RestResource for Network {
    const KIND: &'static str = "network";

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle {
        &mut self.handle
    }

    fn to_representation(&self) -> Value {
        json!({
            "name": self.handle.name,
            "description": "Generated network",
            "autoCreateSubnetworks": self.auto_subnets,
        })
    }

    async fn create(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Create network {} in project {}", self.handle.name, self.handle.project);
        client
            .post(&self.collection_url(client), Some(&self.to_representation()))
            .await
    }

    async fn get(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::debug!("Get network {} details", self.handle.name);
        client.get(&self.item_url(client)).await
    }

    async fn delete(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Delete network {}", self.handle.name);
        client.delete(&self.item_url(client)).await
    }

    async fn list(&self, client: &GcpClient) -> Result<Vec<Value>, GcpError> {
        tracing::debug!("List networks in project {}", self.handle.project);
        fetcher::fetch_all(client, &self.collection_url(client), &[], "items").await
    }

    fn update_model(&mut self, body: Value) {
        self.iprange = body
            .get("IPv4Range")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(auto) = body.get("autoCreateSubnetworks").and_then(|v| v.as_bool()) {
            self.auto_subnets = auto;
        }
        self.handle.body = Some(body);
    }
}

/// Network the node's resources attach to: the runtime name of a
/// `contained_in_network` target, or the configured default
pub fn containing_network(ctx: &NodeContext, config: &GcpConfig) -> String {
    let related = ctx
        .relationships(Some(CONTAINED_IN_NETWORK), Some(NETWORK_TYPE))
        .into_iter()
        .find_map(|rel| rel.target.runtime_properties.get_str(NAME).map(str::to_string));

    let name = related.unwrap_or_else(|| config.network.clone());
    if name.contains('/') {
        name
    } else {
        format!("global/networks/{}", name)
    }
}

fn default_auto_subnets() -> bool {
    true
}

/// Inputs of a network node
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_auto_subnets")]
    pub auto_subnets: bool,
}

impl Default for NetworkProperties {
    fn default() -> Self {
        Self {
            name: None,
            auto_subnets: default_auto_subnets(),
        }
    }
}

fn network_for(ctx: &NodeContext, client: &GcpClient, name: &str, auto_subnets: bool) -> Network {
    let handle = ResourceHandle::global(name, &client.project_id).with_external(ctx.use_external_resource());
    Network::new(handle, auto_subnets)
}

/// Create the network, finishing across host retries
pub async fn create(ctx: &mut NodeContext, client: &GcpClient, props: &NetworkProperties) -> OperationResult {
    let policy = RetryPolicy::for_node(ctx);
    let name = match ctx.runtime().get_str(NAME) {
        Some(name) => name.to_string(),
        None => resolve_name(ctx, props.name.as_deref())?,
    };
    let mut network = network_for(ctx, client, &name, props.auto_subnets);
    let label = network.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Create, &label).await?.is_none() {
        match create_resource(ctx, &mut network, client, &policy).await? {
            CreateOutcome::Existing(body) => {
                ctx.runtime_mut().merge(&body);
                ctx.runtime_mut().insert(NAME, network.name());
                return Ok(());
            },
            CreateOutcome::Issued(response) => {
                ctx.runtime_mut().insert(NAME, network.name());
                pending::await_later(ctx, Verb::Create, response, &policy, &format!("{} creation started", label))?;
            },
        }
    }

    let body = policy.check(
        ctx,
        &label,
        network.get(client).await,
        &format!("Retrying fetching {}", label),
    )?;
    network.update_model(body.clone());
    ctx.runtime_mut().merge(&body);
    Ok(())
}

/// Delete the network unless external, finishing across host retries
pub async fn delete(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    let Some(name) = ctx.runtime().get_str(NAME).map(str::to_string) else {
        return Ok(());
    };

    let policy = RetryPolicy::for_node(ctx);
    let network = network_for(ctx, client, &name, true);
    let label = network.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Delete, &label).await?.is_none() {
        if let Some(response) = delete_if_not_external(ctx, &network, client, &policy).await? {
            pending::await_later(ctx, Verb::Delete, response, &policy, &format!("{} deletion started", label))?;
        }
    }

    ctx.runtime_mut().remove(NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{RelatedInstance, Relationship, RuntimeProperties};

    #[test]
    fn test_representation() {
        let network = Network::new(ResourceHandle::global("net-1", "p"), false);
        assert_eq!(
            network.to_representation(),
            json!({
                "name": "net-1",
                "description": "Generated network",
                "autoCreateSubnetworks": false,
            })
        );
    }

    #[test]
    fn test_update_model_reads_legacy_range() {
        let mut network = Network::new(ResourceHandle::global("net-1", "p"), true);
        network.update_model(json!({"name": "net-1", "IPv4Range": "10.0.0.0/16", "autoCreateSubnetworks": false}));
        assert_eq!(network.iprange.as_deref(), Some("10.0.0.0/16"));
        assert!(!network.auto_subnets);
        assert!(network.handle.body.is_some());
    }

    #[test]
    fn test_containing_network_defaults_to_config() {
        let ctx = NodeContext::new("fw", "firewall_rule", "fw_1");
        let config = GcpConfig::default();
        assert_eq!(containing_network(&ctx, &config), "global/networks/default");
    }

    #[test]
    fn test_containing_network_from_relationship() {
        let mut runtime = RuntimeProperties::default();
        runtime.insert(NAME, "prod-net");
        let ctx = NodeContext::new("fw", "firewall_rule", "fw_1").with_relationship(Relationship {
            kind: CONTAINED_IN_NETWORK.to_string(),
            target: RelatedInstance {
                node_id: "net".to_string(),
                node_type: NETWORK_TYPE.to_string(),
                instance_id: "net_1".to_string(),
                runtime_properties: runtime,
            },
        });

        assert_eq!(containing_network(&ctx, &GcpConfig::default()), "global/networks/prod-net");
    }

    #[test]
    fn test_properties_default_to_auto_subnets() {
        let props: NetworkProperties = serde_json::from_value(json!({"name": "n"})).unwrap();
        assert!(props.auto_subnets);
    }
}
