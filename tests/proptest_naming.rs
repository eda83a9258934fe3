//! Property-based tests for resource name normalization
//!
//! Names are derived from node ids, instance ids and user input, so
//! `normalize` has to cope with anything.

use proptest::prelude::*;

use gcp_lifecycle::gcp::naming::{is_valid_name, normalize};

/// Strings that look like orchestrator-generated names
fn arb_instance_name() -> impl Strategy<Value = String> {
    ("[A-Za-z0-9_]{1,80}", "[a-z0-9]{6}").prop_map(|(node, suffix)| format!("{}_{}", node, suffix))
}

proptest! {
    #[test]
    fn test_normalized_name_is_valid(name in ".*") {
        let normalized = normalize(&name);
        prop_assert!(is_valid_name(&normalized), "invalid name {:?} from {:?}", normalized, name);
    }

    #[test]
    fn test_normalize_is_idempotent(name in ".*") {
        let once = normalize(&name);
        prop_assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_normalized_length_is_bounded(name in ".{0,200}") {
        let normalized = normalize(&name);
        prop_assert!(!normalized.is_empty());
        prop_assert!(normalized.len() <= 63);
    }

    #[test]
    fn test_valid_names_are_unchanged(name in "[a-z]([-a-z0-9]{0,61}[a-z0-9])?") {
        prop_assert!(is_valid_name(&name));
        prop_assert_eq!(normalize(&name), name);
    }

    #[test]
    fn test_long_instance_names_keep_suffix(name in arb_instance_name()) {
        let normalized = normalize(&name);
        let suffix = &name[name.len() - 6..];
        prop_assert!(normalized.ends_with(suffix), "{:?} lost suffix of {:?}", normalized, name);
    }
}
