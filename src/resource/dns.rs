//! Cloud DNS managed zones and record sets
//!
//! Records are not a resource of their own in the API: they are added and
//! removed through change requests on the zone, which finish quickly and
//! are waited for inline.

use serde::Deserialize;
use serde_json::{json, Value};

use super::fetcher;
use super::{ResourceHandle, RestResource};
use crate::constants::{
    CREATED, DEFAULT_DNS_TTL, DNS_CHANGE_DONE, DNS_CHANGE_PENDING, DNS_RECORD_CONTAINED_IN_ZONE,
    DNS_RECORD_TYPE, DNS_ZONE_TYPE, MANAGED_ZONE, NAME, OPERATION_POLL_INTERVAL, RECORD_TYPE,
};
use crate::error::{GcpError, OperationError, OperationResult};
use crate::gcp::client::{encode, GcpClient};
use crate::host::NodeContext;
use crate::lifecycle::classify::terminal;
use crate::lifecycle::{
    create_resource, delete_if_not_external, is_object_deleted, resolve_name, CreateOutcome, RetryPolicy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DnsZone {
    pub handle: ResourceHandle,
    /// Fully qualified, with the trailing dot
    pub dns_name: Option<String>,
}

/// Add the trailing dot Cloud DNS expects on absolute names
pub fn fully_qualified(dns_name: &str) -> String {
    if dns_name.ends_with('.') {
        dns_name.to_string()
    } else {
        format!("{}.", dns_name)
    }
}

impl DnsZone {
    pub fn new(handle: ResourceHandle, dns_name: Option<&str>) -> Self {
        Self {
            handle,
            dns_name: dns_name.map(fully_qualified),
        }
    }

    fn collection_url(&self, client: &GcpClient) -> String {
        client.dns_url(&self.handle.project, "managedZones")
    }

    fn item_url(&self, client: &GcpClient, resource: &str) -> String {
        client.dns_zone_url(&self.handle.project, &self.handle.name, resource)
    }

    /// Record sets of the zone, optionally filtered by name and type
    pub async fn list_records(
        &self,
        client: &GcpClient,
        name: Option<&str>,
        record_type: Option<&str>,
    ) -> Result<Vec<Value>, GcpError> {
        tracing::debug!("List record sets of DNS zone {}", self.handle.name);
        fetcher::fetch_all(
            client,
            &self.item_url(client, "rrsets"),
            &[("name", name), ("type", record_type)],
            "rrsets",
        )
        .await
    }

    /// Submit a change request; `action` is `additions` or `deletions`
    pub async fn create_change(&self, client: &GcpClient, action: &str, data: Value) -> Result<Value, GcpError> {
        tracing::info!("Submit {} to DNS zone {}", action, self.handle.name);
        let mut body = serde_json::Map::new();
        body.insert(action.to_string(), data);
        let body = Value::Object(body);
        client
            .post(&self.item_url(client, "changes"), Some(&body))
            .await
    }

    pub async fn get_change(&self, client: &GcpClient, id: &str) -> Result<Value, GcpError> {
        client
            .get(&self.item_url(client, &format!("changes/{}", encode(id))))
            .await
    }

    /// Poll a change until it leaves `pending`
    pub async fn wait_for_change(&self, client: &GcpClient, mut change: Value) -> Result<Value, GcpError> {
        while change_status(&change) == Some(DNS_CHANGE_PENDING) {
            let id = change
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GcpError::MalformedResponse("DNS change has no id".to_string()))?
                .to_string();

            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
            change = self.get_change(client, &id).await?;
        }
        Ok(change)
    }
}

fn change_status(change: &Value) -> Option<&str> {
    change.get("status").and_then(|v| v.as_str())
}

impl RestResource for DnsZone {
    const KIND: &'static str = "DNS zone";

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle {
        &mut self.handle
    }

    fn to_representation(&self) -> Value {
        json!({
            "name": self.handle.name,
            "description": "Generated DNS zone",
            "dnsName": self.dns_name,
        })
    }

    async fn create(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Create DNS zone {}", self.handle.name);
        client
            .post(&self.collection_url(client), Some(&self.to_representation()))
            .await
    }

    async fn get(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::debug!("Get DNS zone {} details", self.handle.name);
        client.get(&self.item_url(client, "")).await
    }

    async fn delete(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Delete DNS zone {}", self.handle.name);
        client.delete(&self.item_url(client, "")).await
    }

    async fn list(&self, client: &GcpClient) -> Result<Vec<Value>, GcpError> {
        fetcher::fetch_all(client, &self.collection_url(client), &[], "managedZones").await
    }

    fn update_model(&mut self, body: Value) {
        if let Some(dns_name) = body.get("dnsName").and_then(|v| v.as_str()) {
            self.dns_name = Some(dns_name.to_string());
        }
        self.handle.body = Some(body);
    }
}

/// Inputs of a DNS zone node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsZoneProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dns_name: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub async fn create_zone(ctx: &mut NodeContext, client: &GcpClient, props: &DnsZoneProperties) -> OperationResult {
    let policy = RetryPolicy::for_node(ctx);

    let declared = non_empty(props.name.as_deref()).unwrap_or(&ctx.node_id).to_string();
    let dns_name = non_empty(props.dns_name.as_deref()).unwrap_or(&declared).to_string();
    let name = resolve_name(ctx, Some(&declared))?;

    let handle = ResourceHandle::global(&name, &client.project_id).with_external(ctx.use_external_resource());
    let mut zone = DnsZone::new(handle, Some(&dns_name));

    // The API returns the zone itself, not an operation
    let body = match create_resource(ctx, &mut zone, client, &policy).await? {
        CreateOutcome::Existing(body) | CreateOutcome::Issued(body) => body,
    };

    let runtime = ctx.runtime_mut();
    runtime.merge(&body);
    runtime.insert(NAME, zone.name());
    Ok(())
}

pub async fn delete_zone(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    let Some(name) = ctx.runtime().get_str(NAME).map(str::to_string) else {
        return Ok(());
    };

    let policy = RetryPolicy::for_node(ctx);
    let handle = ResourceHandle::global(&name, &client.project_id).with_external(ctx.use_external_resource());
    let zone = DnsZone::new(handle, None);
    let label = zone.describe();

    delete_if_not_external(ctx, &zone, client, &policy).await?;

    if !ctx.use_external_resource() {
        let deleted = policy.check(
            ctx,
            &label,
            is_object_deleted(&zone, client).await,
            "Zone is not yet deleted",
        )?;
        if !deleted {
            return Err(ctx.retry("Zone is not yet deleted", policy.delay));
        }
    }

    ctx.runtime_mut().remove(NAME);
    Ok(())
}

fn default_ttl() -> u32 {
    DEFAULT_DNS_TTL
}

/// Inputs of a DNS record node
#[derive(Debug, Clone, Deserialize)]
pub struct DnsRecordProperties {
    #[serde(rename = "type")]
    pub record_type: String,
    /// Relative to the zone; empty means the zone apex
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

/// Check the endpoint types of every `dns_record_contained_in_zone` edge
pub fn validate_contained_in(ctx: &NodeContext) -> OperationResult {
    for rel in ctx.relationships(Some(DNS_RECORD_CONTAINED_IN_ZONE), None) {
        if ctx.node_type != DNS_RECORD_TYPE || rel.target.node_type != DNS_ZONE_TYPE {
            return Err(OperationError::non_recoverable(format!(
                "Unsupported types for {} relationship",
                rel.kind
            )));
        }
    }
    Ok(())
}

/// Fully qualified record name inside a zone
pub fn record_name(name: &str, zone_dns_name: &str) -> String {
    let zone_dns_name = fully_qualified(zone_dns_name);
    if name.is_empty() {
        zone_dns_name
    } else {
        format!("{}.{}", name.trim_end_matches('.'), zone_dns_name)
    }
}

fn finished_change(change: Value, label: &str) -> OperationResult {
    match change_status(&change) {
        Some(DNS_CHANGE_DONE) => Ok(()),
        _ => Err(OperationError::non_recoverable(format!(
            "{}: unexpected response status: {}",
            label, change
        ))),
    }
}

pub async fn create_record(ctx: &mut NodeContext, client: &GcpClient, props: &DnsRecordProperties) -> OperationResult {
    ctx.runtime_mut().insert(CREATED, false);
    validate_contained_in(ctx)?;

    let policy = RetryPolicy::for_node(ctx);

    let (zone_name, zone_dns_name) = {
        let Some(rel) = ctx
            .relationships(Some(DNS_RECORD_CONTAINED_IN_ZONE), Some(DNS_ZONE_TYPE))
            .into_iter()
            .next()
        else {
            return Err(OperationError::non_recoverable(
                "A DNS record must be contained in a DNS zone",
            ));
        };
        let runtime = &rel.target.runtime_properties;
        match (runtime.get_str(NAME), runtime.get_str("dnsName")) {
            (Some(name), Some(dns_name)) => (name.to_string(), dns_name.to_string()),
            _ => {
                return Err(OperationError::non_recoverable(format!(
                    "DNS zone {} has not been created yet",
                    rel.target.node_id
                )))
            },
        }
    };

    let zone = DnsZone::new(ResourceHandle::global(&zone_name, &client.project_id), Some(&zone_dns_name));
    let fqdn = record_name(&props.name, &zone_dns_name);
    let label = format!("DNS record {} ({})", fqdn, props.record_type);

    let change = policy.check(
        ctx,
        &label,
        zone.create_change(
            client,
            "additions",
            json!([{
                "name": fqdn,
                "ttl": props.ttl,
                "type": props.record_type,
                "rrdatas": props.resources,
            }]),
        )
        .await,
        &format!("Retrying creating {}", label),
    )?;

    let change = zone
        .wait_for_change(client, change)
        .await
        .map_err(|e| terminal(&label, &e))?;
    finished_change(change, &label)?;

    let runtime = ctx.runtime_mut();
    runtime.insert(NAME, fqdn);
    runtime.insert(MANAGED_ZONE, zone_name);
    runtime.insert(RECORD_TYPE, props.record_type.clone());
    runtime.insert(CREATED, true);
    Ok(())
}

pub async fn delete_record(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    if ctx.runtime().get(CREATED).and_then(|v| v.as_bool()) != Some(true) {
        return Ok(());
    }

    let runtime = ctx.runtime();
    let (Some(fqdn), Some(zone_name), Some(record_type)) = (
        runtime.get_str(NAME).map(str::to_string),
        runtime.get_str(MANAGED_ZONE).map(str::to_string),
        runtime.get_str(RECORD_TYPE).map(str::to_string),
    ) else {
        return Err(OperationError::non_recoverable(
            "DNS record runtime properties are incomplete",
        ));
    };

    let policy = RetryPolicy::for_node(ctx);
    let zone = DnsZone::new(ResourceHandle::global(&zone_name, &client.project_id), None);
    let label = format!("DNS record {} ({})", fqdn, record_type);
    let retry_message = "Retrying deleting DNS Record";

    let rrsets = policy.check(
        ctx,
        &label,
        zone.list_records(client, Some(&fqdn), Some(&record_type)).await,
        retry_message,
    )?;

    if rrsets.is_empty() {
        tracing::info!("{} is already gone", label);
    } else {
        let change = policy.check(
            ctx,
            &label,
            zone.create_change(client, "deletions", Value::Array(rrsets)).await,
            retry_message,
        )?;
        let change = zone
            .wait_for_change(client, change)
            .await
            .map_err(|e| terminal(&label, &e))?;
        finished_change(change, &label)?;
    }

    let runtime = ctx.runtime_mut();
    runtime.remove(CREATED);
    runtime.remove(NAME);
    runtime.remove(MANAGED_ZONE);
    runtime.remove(RECORD_TYPE);
    Ok(())
}
