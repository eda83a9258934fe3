//! Firewall rules and security groups
//!
//! A security group is a set of firewall rules sharing a target tag. Its
//! rules are created and deleted through the reconciliation driver so that
//! the host can re-invoke the operation until every rule is done.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::fetcher;
use super::network::containing_network;
use super::{ResourceHandle, RestResource, Verb};
use crate::config::GcpConfig;
use crate::constants::{NAME, OPERATIONS, RULES};
use crate::error::{GcpError, OperationError, OperationResult};
use crate::gcp::client::{encode, GcpClient};
use crate::gcp::naming::normalize;
use crate::host::NodeContext;
use crate::lifecycle::external::assure_resource_id_correct;
use crate::lifecycle::{
    create_resource, delete_if_not_external, handle_multiple_calls, pending, resolve_name, CreateOutcome,
    ReconciliationBatch, RetryPolicy,
};

/// Allowed traffic: protocol -> ports (no ports means all ports)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowed(BTreeMap<String, Vec<String>>);

impl Allowed {
    /// Parse `{"tcp": ["80", 443], "icmp": ""}`; ports may be strings, numbers,
    /// lists of either, or empty
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let Some(entries) = value.as_object() else {
            if value.is_null() {
                return Ok(Self::default());
            }
            return Err(format!("allowed must be a map of protocol to ports, got {}", value));
        };

        let mut allowed = BTreeMap::new();
        for (protocol, ports) in entries {
            let ports = match ports {
                Value::Null => Vec::new(),
                Value::Array(items) => items
                    .iter()
                    .map(port_to_string)
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .flatten()
                    .collect(),
                single => port_to_string(single)?.into_iter().collect(),
            };
            allowed.insert(protocol.clone(), ports);
        }

        Ok(Self(allowed))
    }

    pub fn insert(&mut self, protocol: &str, ports: &[&str]) {
        self.0.insert(
            protocol.to_string(),
            ports.iter().map(|p| p.to_string()).collect(),
        );
    }

    /// `allowed[]` entries of the firewall body, ordered by protocol
    pub fn to_rules(&self) -> Vec<Value> {
        self.0
            .iter()
            .map(|(protocol, ports)| {
                if ports.is_empty() {
                    json!({ "IPProtocol": protocol })
                } else {
                    json!({ "IPProtocol": protocol, "ports": ports })
                }
            })
            .collect()
    }

    /// Compact form used in generated rule names ("tcp4041")
    pub fn label(&self) -> String {
        self.0
            .iter()
            .map(|(protocol, ports)| format!("{}{}", protocol, ports.concat()))
            .collect()
    }
}

fn port_to_string(port: &Value) -> Result<Option<String>, String> {
    match port {
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        other => Err(format!("invalid port specification: {}", other)),
    }
}

impl<'de> Deserialize<'de> for Allowed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Split sources into CIDR ranges (leading digit) and network tags, keeping order
pub fn split_sources(sources: &[String]) -> (Vec<String>, Vec<String>) {
    sources
        .iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .partition(|s| s.starts_with(|c: char| c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirewallRule {
    pub handle: ResourceHandle,
    pub network: String,
    pub allowed: Allowed,
    pub sources: Vec<String>,
    pub target_tags: Vec<String>,
    /// Part of a security group rather than a standalone rule
    pub security_group: bool,
}

impl FirewallRule {
    pub fn new(handle: ResourceHandle, network: &str) -> Self {
        Self {
            handle,
            network: network.to_string(),
            allowed: Allowed::default(),
            sources: Vec::new(),
            target_tags: Vec::new(),
            security_group: false,
        }
    }

    pub fn with_allowed(mut self, allowed: Allowed) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_target_tags(mut self, target_tags: Vec<String>) -> Self {
        self.target_tags = target_tags;
        self
    }

    pub fn in_security_group(mut self) -> Self {
        self.security_group = true;
        self
    }

    fn collection_url(&self, client: &GcpClient) -> String {
        client.compute_global_url(&self.handle.project, "firewalls")
    }

    fn item_url(&self, client: &GcpClient) -> String {
        client.compute_global_url(
            &self.handle.project,
            &format!("firewalls/{}", encode(&self.handle.name)),
        )
    }
}

impl RestResource for FirewallRule {
    const KIND: &'static str = "firewall rule";

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle {
        &mut self.handle
    }

    fn to_representation(&self) -> Value {
        let (source_ranges, source_tags) = split_sources(&self.sources);
        let description = if self.security_group {
            "Generated security group rule"
        } else {
            "Generated firewall rule"
        };

        let mut body = json!({
            "name": self.handle.name,
            "description": description,
            "network": self.network,
            "allowed": self.allowed.to_rules(),
            "sourceTags": source_tags,
            "sourceRanges": source_ranges,
        });

        if !self.target_tags.is_empty() {
            body["targetTags"] = json!(self.target_tags);
        }

        body
    }

    async fn create(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Create firewall rule {} in network {}", self.handle.name, self.network);
        client
            .post(&self.collection_url(client), Some(&self.to_representation()))
            .await
    }

    async fn get(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::debug!("Get firewall rule {} details", self.handle.name);
        client.get(&self.item_url(client)).await
    }

    async fn delete(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Delete firewall rule {} from network {}", self.handle.name, self.network);
        client.delete(&self.item_url(client)).await
    }

    async fn list(&self, client: &GcpClient) -> Result<Vec<Value>, GcpError> {
        tracing::debug!("List firewall rules in project {}", self.handle.project);
        fetcher::fetch_all(client, &self.collection_url(client), &[], "items").await
    }

    async fn update(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Update firewall rule {}", self.handle.name);
        client
            .put(&self.item_url(client), &self.to_representation())
            .await
    }
}

/// Inputs of a standalone firewall rule node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub allowed: Allowed,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub target_tags: Vec<String>,
}

/// One rule of a security group
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityGroupRule {
    #[serde(default)]
    pub allowed: Allowed,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Inputs of a security group node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityGroupProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
}

fn rule_for(ctx: &NodeContext, client: &GcpClient, name: &str, network: &str) -> FirewallRule {
    let handle = ResourceHandle::global(name, &client.project_id).with_external(ctx.use_external_resource());
    FirewallRule::new(handle, network)
}

/// Create the rule, finishing across host retries
pub async fn create(ctx: &mut NodeContext, client: &GcpClient, props: &FirewallProperties) -> OperationResult {
    let config = GcpConfig::resolve(ctx)?;
    let policy = RetryPolicy::for_node(ctx);
    let network = containing_network(ctx, &config);
    let name = match ctx.runtime().get_str(NAME) {
        Some(name) => name.to_string(),
        None => resolve_name(ctx, props.name.as_deref())?,
    };

    let mut rule = rule_for(ctx, client, &name, &network)
        .with_allowed(props.allowed.clone())
        .with_sources(props.sources.clone())
        .with_target_tags(props.target_tags.clone());
    let label = rule.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Create, &label).await?.is_some() {
        return Ok(());
    }

    let outcome = create_resource(ctx, &mut rule, client, &policy).await?;
    ctx.runtime_mut().insert(NAME, rule.name());
    match outcome {
        CreateOutcome::Existing(_) => Ok(()),
        CreateOutcome::Issued(response) => {
            pending::await_later(ctx, Verb::Create, response, &policy, &format!("Retrying creating {}", label))
        },
    }
}

/// Replace the rule with the declared fields
pub async fn update(ctx: &mut NodeContext, client: &GcpClient, props: &FirewallProperties) -> OperationResult {
    let Some(name) = ctx.runtime().get_str(NAME).map(str::to_string) else {
        return Err(OperationError::non_recoverable("Firewall rule has not been created"));
    };
    if ctx.use_external_resource() {
        return Err(OperationError::non_recoverable(format!(
            "Firewall rule {} is external and cannot be updated",
            name
        )));
    }

    let config = GcpConfig::resolve(ctx)?;
    let policy = RetryPolicy::for_node(ctx);
    let network = containing_network(ctx, &config);

    let rule = rule_for(ctx, client, &name, &network)
        .with_allowed(props.allowed.clone())
        .with_sources(props.sources.clone())
        .with_target_tags(props.target_tags.clone());
    let label = rule.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Update, &label).await?.is_some() {
        return Ok(());
    }

    let response = policy.check(
        ctx,
        &label,
        rule.update(client).await,
        &format!("Retrying updating {}", label),
    )?;
    pending::await_later(ctx, Verb::Update, response, &policy, &format!("Retrying updating {}", label))
}

/// Delete the rule unless external, finishing across host retries
pub async fn delete(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    let Some(name) = ctx.runtime().get_str(NAME).map(str::to_string) else {
        return Ok(());
    };

    let config = GcpConfig::resolve(ctx)?;
    let policy = RetryPolicy::for_node(ctx);
    let network = containing_network(ctx, &config);

    let name = if ctx.use_external_resource() { name } else { normalize(&name) };
    let rule = rule_for(ctx, client, &name, &network);
    let label = rule.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Delete, &label).await?.is_none() {
        if let Some(response) = delete_if_not_external(ctx, &rule, client, &policy).await? {
            pending::await_later(ctx, Verb::Delete, response, &policy, &format!("Retrying deleting {}", label))?;
        }
    }

    ctx.runtime_mut().remove(NAME);
    Ok(())
}

/// Name of the security group: `ctx-sg-` followed by the declared name or the
/// instance id
pub fn security_group_name(ctx: &NodeContext, declared: Option<&str>) -> String {
    let base = declared
        .filter(|n| !n.is_empty())
        .unwrap_or(&ctx.instance_id);
    normalize(&format!("ctx-sg-{}", base))
}

/// GCP-compatible name of one security group rule
pub fn create_rule_name(group: &str, rule: &SecurityGroupRule) -> String {
    normalize(&format!(
        "{}-from-{}-to-{}",
        group,
        rule.sources.concat(),
        rule.allowed.label()
    ))
}

fn group_rules(group: &str, network: &str, project: &str, rules: &[SecurityGroupRule]) -> Vec<FirewallRule> {
    rules
        .iter()
        .map(|rule| {
            let handle = ResourceHandle::global(&create_rule_name(group, rule), project);
            FirewallRule::new(handle, network)
                .with_allowed(rule.allowed.clone())
                .with_sources(rule.sources.clone())
                .with_target_tags(vec![group.to_string()])
                .in_security_group()
        })
        .collect()
}

/// Whether a firewall body targets the group's tag
fn targets_group(rule: &Value, group: &str) -> bool {
    rule.get("targetTags")
        .and_then(|tags| tags.as_array())
        .is_some_and(|tags| tags.iter().any(|tag| tag.as_str() == Some(group)))
}

/// Adopt an existing group: its rules are the project's firewalls targeting
/// `resource_id`. Nothing is created.
async fn use_external_security_group(
    ctx: &mut NodeContext,
    client: &GcpClient,
    policy: &RetryPolicy,
    network: &str,
) -> OperationResult {
    let group = assure_resource_id_correct(ctx)?;
    let lookup = FirewallRule::new(ResourceHandle::global(&group, &client.project_id).with_external(true), network);
    let label = format!("security group {}", group);

    let firewalls = policy.check(
        ctx,
        &label,
        lookup.list(client).await,
        &format!("Retrying fetching {}", label),
    )?;
    let rules: Vec<Value> = firewalls
        .into_iter()
        .filter(|rule| targets_group(rule, &group))
        .collect();

    if rules.is_empty() {
        return Err(OperationError::non_recoverable(format!(
            "Resource {} defined as external, but does not exist.",
            group
        )));
    }

    tracing::info!("Using external {} with {} rules", label, rules.len());
    let runtime = ctx.runtime_mut();
    runtime.insert(NAME, group);
    runtime.insert(RULES, Value::Array(rules));
    Ok(())
}

pub async fn create_security_group(
    ctx: &mut NodeContext,
    client: &GcpClient,
    props: &SecurityGroupProperties,
) -> OperationResult {
    let config = GcpConfig::resolve(ctx)?;
    let policy = RetryPolicy::for_node(ctx);
    let network = containing_network(ctx, &config);

    if ctx.use_external_resource() {
        return use_external_security_group(ctx, client, &policy, &network).await;
    }

    let name = security_group_name(ctx, props.name.as_deref());

    let firewalls = group_rules(&name, &network, &client.project_id, &props.rules);

    ctx.runtime_mut().insert(NAME, name);
    handle_multiple_calls(ctx, client, &firewalls, Verb::Create, &policy).await
}

/// Record the created rules under `rules` and drop the operation batch
pub async fn configure_security_group(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    // External rules were recorded when the group was adopted
    if ctx.use_external_resource() {
        return Ok(());
    }

    let config = GcpConfig::resolve(ctx)?;
    let policy = RetryPolicy::for_node(ctx);
    let network = containing_network(ctx, &config);

    let batch = ReconciliationBatch::load(ctx)?;
    let names: Vec<String> = batch.names().cloned().collect();

    let mut rules = Vec::with_capacity(names.len());
    for name in names {
        let rule = FirewallRule::new(ResourceHandle::global(&name, &client.project_id), &network);
        let label = rule.describe();
        let body = policy.check(
            ctx,
            &label,
            rule.get(client).await,
            &format!("Retrying fetching {}", label),
        )?;
        rules.push(body);
    }

    let runtime = ctx.runtime_mut();
    runtime.insert(RULES, Value::Array(rules));
    runtime.remove(OPERATIONS);
    Ok(())
}

pub async fn delete_security_group(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    if ctx.use_external_resource() {
        tracing::info!("Not deleting rules of external security group {}", ctx.node_id);
        let runtime = ctx.runtime_mut();
        runtime.remove(OPERATIONS);
        runtime.remove(RULES);
        runtime.remove(NAME);
        return Ok(());
    }

    let config = GcpConfig::resolve(ctx)?;
    let policy = RetryPolicy::for_node(ctx);
    let network = containing_network(ctx, &config);

    if !ctx.runtime().contains_key(RULES) {
        // Configure never ran: the batch still holds create results.
        // Turn its names into the rule list so deletion starts from scratch.
        let batch = ReconciliationBatch::load(ctx)?;
        let rules: Vec<Value> = batch.names().map(|name| json!({ "name": name })).collect();
        let runtime = ctx.runtime_mut();
        runtime.insert(RULES, Value::Array(rules));
        runtime.remove(OPERATIONS);
    }

    let names: Vec<String> = ctx
        .runtime()
        .get(RULES)
        .and_then(|v| v.as_array())
        .map(|rules| {
            rules
                .iter()
                .filter_map(|rule| rule.get("name").and_then(|n| n.as_str()))
                .map(normalize)
                .collect()
        })
        .unwrap_or_default();

    let firewalls: Vec<FirewallRule> = names
        .iter()
        .map(|name| FirewallRule::new(ResourceHandle::global(name, &client.project_id), &network))
        .collect();

    handle_multiple_calls(ctx, client, &firewalls, Verb::Delete, &policy).await?;

    let runtime = ctx.runtime_mut();
    runtime.remove(OPERATIONS);
    runtime.remove(RULES);
    runtime.remove(NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(sources: &[&str]) -> FirewallRule {
        let mut allowed = Allowed::default();
        allowed.insert("tcp", &["80"]);
        FirewallRule::new(ResourceHandle::global("name", "test-project"), "global/networks/default")
            .with_allowed(allowed)
            .with_sources(sources.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_sources_split_into_ranges_and_tags() {
        let body = rule(&["1.2.3.0/24", "sauce", "10.0.0.0/8", "web"]).to_representation();
        assert_eq!(body["sourceRanges"], json!(["1.2.3.0/24", "10.0.0.0/8"]));
        assert_eq!(body["sourceTags"], json!(["sauce", "web"]));
    }

    #[test]
    fn test_representation_is_deterministic() {
        let a = rule(&["1", "sauce"]).to_representation();
        let b = rule(&["1", "sauce"]).to_representation();
        assert_eq!(a, b);
        assert_eq!(
            a,
            json!({
                "name": "name",
                "description": "Generated firewall rule",
                "network": "global/networks/default",
                "allowed": [{"IPProtocol": "tcp", "ports": ["80"]}],
                "sourceTags": ["sauce"],
                "sourceRanges": ["1"],
            })
        );
    }

    #[test]
    fn test_target_tags_only_when_present() {
        let body = rule(&[]).with_target_tags(vec!["web".into()]).to_representation();
        assert_eq!(body["targetTags"], json!(["web"]));
        assert!(rule(&[]).to_representation().get("targetTags").is_none());
    }

    #[test]
    fn test_allowed_parsing() {
        let allowed = Allowed::from_value(&json!({
            "udp": "",
            "tcp": ["40", 41],
            "icmp": null,
            "sctp": 9000
        }))
        .unwrap();

        assert_eq!(
            allowed.to_rules(),
            vec![
                json!({"IPProtocol": "icmp"}),
                json!({"IPProtocol": "sctp", "ports": ["9000"]}),
                json!({"IPProtocol": "tcp", "ports": ["40", "41"]}),
                json!({"IPProtocol": "udp"}),
            ]
        );
        assert!(Allowed::from_value(&json!(["tcp"])).is_err());
        assert!(Allowed::from_value(&json!({"tcp": {"port": 1}})).is_err());
    }

    #[test]
    fn test_rule_names() {
        let first: SecurityGroupRule = serde_json::from_value(json!({
            "allowed": {"NOTHING!": ""},
            "sources": ["bob", "jane"]
        }))
        .unwrap();
        let second: SecurityGroupRule = serde_json::from_value(json!({
            "allowed": {"tcp": ["40", 41]},
            "sources": ["jane"]
        }))
        .unwrap();

        assert_eq!(create_rule_name("ctx-sg-name", &first), "ctx-sg-name-from-bobjane-to-nothing");
        assert_eq!(create_rule_name("ctx-sg-name", &second), "ctx-sg-name-from-jane-to-tcp4041");
    }

    #[test]
    fn test_security_group_name() {
        let ctx = NodeContext::new("sg", "security_group", "sg_a1b2c3");
        assert_eq!(security_group_name(&ctx, Some("name")), "ctx-sg-name");
        assert_eq!(security_group_name(&ctx, None), "ctx-sg-sg-a1b2c3");
    }

    #[test]
    fn test_targets_group() {
        assert!(targets_group(&json!({"targetTags": ["web", "ctx-sg-web"]}), "ctx-sg-web"));
        assert!(!targets_group(&json!({"targetTags": ["web"]}), "ctx-sg-web"));
        assert!(!targets_group(&json!({"name": "untargeted"}), "ctx-sg-web"));
    }

    #[test]
    fn test_group_rules_share_target_tag() {
        let rules = vec![SecurityGroupRule {
            allowed: Allowed::default(),
            sources: vec!["0.0.0.0/0".to_string()],
        }];
        let firewalls = group_rules("ctx-sg-web", "net", "test-project", &rules);
        let body = firewalls[0].to_representation();
        assert_eq!(body["targetTags"], json!(["ctx-sg-web"]));
        assert_eq!(body["description"], "Generated security group rule");
        assert_eq!(body["sourceRanges"], json!(["0.0.0.0/0"]));
    }
}
