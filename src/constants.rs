//! Shared constants: GCP limits, property keys and relationship types

use std::time::Duration;

pub const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";
pub const DNS_ENDPOINT: &str = "https://dns.googleapis.com/dns/v1";

/// Longest resource name GCP accepts
pub const MAX_GCP_NAME: usize = 63;
/// Trailing characters kept when a name is truncated
pub const ID_HASH_CONST: usize = 6;

/// Delay requested from the host when a call must be retried later
pub const RETRY_DEFAULT_DELAY: Duration = Duration::from_secs(30);
/// Interval of the blocking operation wait
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const GCP_OP_DONE: &str = "DONE";
/// Cloud DNS change statuses
pub const DNS_CHANGE_PENDING: &str = "pending";
pub const DNS_CHANGE_DONE: &str = "done";
/// Record TTL when none is declared
pub const DEFAULT_DNS_TTL: u32 = 86400;

// Node properties
pub const GCP_CONFIG: &str = "gcp_config";
pub const USE_EXTERNAL_RESOURCE: &str = "use_external_resource";
pub const RESOURCE_ID: &str = "resource_id";
pub const RETRY_DELAY: &str = "retry_delay";

// Runtime properties
pub const NAME: &str = "name";
pub const GCP_ZONE: &str = "zone";
pub const OPERATION: &str = "_operation";
pub const OPERATIONS: &str = "_operations";
pub const RULES: &str = "rules";
pub const CREATED: &str = "created";
pub const MANAGED_ZONE: &str = "managed_zone";
pub const RECORD_TYPE: &str = "type";

// Relationship types
pub const CONTAINED_IN_NETWORK: &str = "contained_in_network";
pub const DNS_RECORD_CONTAINED_IN_ZONE: &str = "dns_record_contained_in_zone";

// Node types
pub const NETWORK_TYPE: &str = "network";
pub const FIREWALL_RULE_TYPE: &str = "firewall_rule";
pub const SECURITY_GROUP_TYPE: &str = "security_group";
pub const URL_MAP_TYPE: &str = "url_map";
pub const DNS_ZONE_TYPE: &str = "dns_zone";
pub const DNS_RECORD_TYPE: &str = "dns_record";
