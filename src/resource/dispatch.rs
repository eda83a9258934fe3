//! Operation Dispatch
//!
//! Maps node types and lifecycle operation names to the functions
//! implementing them. Inputs are read from the node's declared properties.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{dns, firewall, network, url_map};
use crate::constants::{
    DNS_RECORD_TYPE, DNS_ZONE_TYPE, FIREWALL_RULE_TYPE, NETWORK_TYPE, SECURITY_GROUP_TYPE, URL_MAP_TYPE,
};
use crate::error::{OperationError, OperationResult};
use crate::gcp::client::GcpClient;
use crate::host::NodeContext;

/// Node types this crate manages
pub const NODE_TYPES: &[&str] = &[
    NETWORK_TYPE,
    FIREWALL_RULE_TYPE,
    SECURITY_GROUP_TYPE,
    URL_MAP_TYPE,
    DNS_ZONE_TYPE,
    DNS_RECORD_TYPE,
];

/// Operations every node type accepts; `update` is only meaningful for some
pub const LIFECYCLE_OPERATIONS: &[&str] = &["create", "configure", "update", "delete", "validate"];

/// Deserialize the node's declared properties into the inputs of `node_type`
fn inputs<T: DeserializeOwned>(ctx: &NodeContext) -> OperationResult<T> {
    serde_json::from_value(Value::Object(ctx.properties().clone())).map_err(|e| {
        OperationError::non_recoverable(format!("Invalid properties for {}: {}", ctx.node_type, e))
    })
}

fn unknown(node_type: &str, operation: &str) -> OperationError {
    OperationError::non_recoverable(format!(
        "Operation {} is not supported for node type {}",
        operation, node_type
    ))
}

/// Run one lifecycle operation against a node
pub async fn execute_operation(
    node_type: &str,
    operation: &str,
    ctx: &mut NodeContext,
    client: &GcpClient,
) -> OperationResult {
    tracing::info!(
        "execute_operation: node_type={}, operation={}, node={}",
        node_type,
        operation,
        ctx.node_id
    );

    match node_type {
        NETWORK_TYPE => execute_network(operation, ctx, client).await,
        FIREWALL_RULE_TYPE => execute_firewall_rule(operation, ctx, client).await,
        SECURITY_GROUP_TYPE => execute_security_group(operation, ctx, client).await,
        URL_MAP_TYPE => execute_url_map(operation, ctx, client).await,
        DNS_ZONE_TYPE => execute_dns_zone(operation, ctx, client).await,
        DNS_RECORD_TYPE => execute_dns_record(operation, ctx, client).await,
        _ => Err(OperationError::non_recoverable(format!(
            "Unknown node type: {}",
            node_type
        ))),
    }
}

// =============================================================================
// Compute Engine
// =============================================================================

async fn execute_network(operation: &str, ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    match operation {
        "create" => {
            let props: network::NetworkProperties = inputs(ctx)?;
            network::create(ctx, client, &props).await
        },
        "delete" => network::delete(ctx, client).await,
        "configure" | "validate" => Ok(()),
        _ => Err(unknown(NETWORK_TYPE, operation)),
    }
}

async fn execute_firewall_rule(operation: &str, ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    match operation {
        "create" => {
            let props: firewall::FirewallProperties = inputs(ctx)?;
            firewall::create(ctx, client, &props).await
        },
        "update" => {
            let props: firewall::FirewallProperties = inputs(ctx)?;
            firewall::update(ctx, client, &props).await
        },
        "delete" => firewall::delete(ctx, client).await,
        "configure" => Ok(()),
        "validate" => inputs::<firewall::FirewallProperties>(ctx).map(|_| ()),
        _ => Err(unknown(FIREWALL_RULE_TYPE, operation)),
    }
}

async fn execute_security_group(operation: &str, ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    match operation {
        "create" => {
            let props: firewall::SecurityGroupProperties = inputs(ctx)?;
            firewall::create_security_group(ctx, client, &props).await
        },
        "configure" => firewall::configure_security_group(ctx, client).await,
        "delete" => firewall::delete_security_group(ctx, client).await,
        "validate" => inputs::<firewall::SecurityGroupProperties>(ctx).map(|_| ()),
        _ => Err(unknown(SECURITY_GROUP_TYPE, operation)),
    }
}

async fn execute_url_map(operation: &str, ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    match operation {
        "create" => {
            let props: url_map::UrlMapProperties = inputs(ctx)?;
            url_map::create(ctx, client, &props).await
        },
        "update" => {
            let props: url_map::UrlMapProperties = inputs(ctx)?;
            url_map::update(ctx, client, &props).await
        },
        "delete" => url_map::delete(ctx, client).await,
        "configure" => Ok(()),
        "validate" => {
            let props: url_map::UrlMapProperties = inputs(ctx)?;
            url_map::creation_validation(&props)
        },
        _ => Err(unknown(URL_MAP_TYPE, operation)),
    }
}

// =============================================================================
// Cloud DNS
// =============================================================================

async fn execute_dns_zone(operation: &str, ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    match operation {
        "create" => {
            let props: dns::DnsZoneProperties = inputs(ctx)?;
            dns::create_zone(ctx, client, &props).await
        },
        "delete" => dns::delete_zone(ctx, client).await,
        "configure" | "validate" => Ok(()),
        _ => Err(unknown(DNS_ZONE_TYPE, operation)),
    }
}

async fn execute_dns_record(operation: &str, ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    match operation {
        "create" => {
            let props: dns::DnsRecordProperties = inputs(ctx)?;
            dns::create_record(ctx, client, &props).await
        },
        "delete" => dns::delete_record(ctx, client).await,
        "configure" => Ok(()),
        "validate" => dns::validate_contained_in(ctx),
        _ => Err(unknown(DNS_RECORD_TYPE, operation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcpConfig;
    use crate::gcp::auth::GcpCredentials;
    use serde_json::json;

    fn client() -> GcpClient {
        let config = GcpConfig {
            project: "test-project".to_string(),
            ..GcpConfig::default()
        };
        GcpClient::with_credentials(&config, GcpCredentials::from_static("t")).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_node_type_is_terminal() {
        let mut ctx = NodeContext::new("x", "instance", "x_1");
        let err = execute_operation("instance", "create", &mut ctx, &client())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown node type: instance");
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_terminal() {
        let mut ctx = NodeContext::new("net", NETWORK_TYPE, "net_1");
        let err = execute_operation(NETWORK_TYPE, "update", &mut ctx, &client())
            .await
            .unwrap_err();
        assert!(!err.is_retry());
        assert!(err.to_string().contains("not supported"));
    }

    #[tokio::test]
    async fn test_url_map_validation_without_service() {
        let mut ctx = NodeContext::new("map", URL_MAP_TYPE, "map_1").with_property("name", "web");
        let err = execute_operation(URL_MAP_TYPE, "validate", &mut ctx, &client())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "A default backend service must be supplied as default_service"
        );
    }

    #[tokio::test]
    async fn test_invalid_inputs_are_terminal() {
        let mut ctx = NodeContext::new("fw", FIREWALL_RULE_TYPE, "fw_1").with_property("allowed", json!(["tcp"]));
        let err = execute_operation(FIREWALL_RULE_TYPE, "validate", &mut ctx, &client())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid properties for firewall_rule"));
    }

    #[tokio::test]
    async fn test_delete_without_state_is_noop() {
        let client = client();
        // A security group always resolves its configuration first
        for node_type in NODE_TYPES.iter().filter(|t| **t != SECURITY_GROUP_TYPE) {
            let mut ctx = NodeContext::new("n", node_type, "n_1");
            execute_operation(node_type, "delete", &mut ctx, &client).await.unwrap();
        }
    }
}
