//! GCP resource naming rules
//!
//! Names must be 1-63 characters and match `[a-z]([-a-z0-9]*[a-z0-9])?`.

use crate::constants::{ID_HASH_CONST, MAX_GCP_NAME};

/// Turn an arbitrary string into a name GCP accepts.
///
/// Total and idempotent: the result always satisfies [`is_valid_name`] and
/// `normalize(&normalize(s)) == normalize(s)`. Over-long names keep their last
/// few characters, which usually carry the instance suffix.
pub fn normalize(name: &str) -> String {
    let mut chars: Vec<char> = name
        .chars()
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    if !chars.first().is_some_and(|c| c.is_ascii_lowercase()) {
        chars.insert(0, 'a');
    }

    if chars.len() > MAX_GCP_NAME {
        let tail = chars.split_off(chars.len() - ID_HASH_CONST);
        chars.truncate(MAX_GCP_NAME - ID_HASH_CONST);
        chars.extend(tail);
    }

    // First char is a letter, so this never empties the name
    while chars.last() == Some(&'-') {
        chars.pop();
    }

    chars.into_iter().collect()
}

/// Check a name against GCP naming rules without changing it
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_GCP_NAME {
        return false;
    }

    match name.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {},
        _ => return false,
    }

    if name.ends_with('-') {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underscores_become_hyphens() {
        assert_eq!(normalize("test_resource_name1"), "test-resource-name1");
    }

    #[test]
    fn test_long_name_is_trimmed() {
        assert_eq!(normalize(&"a".repeat(70)), "a".repeat(63));
    }

    #[test]
    fn test_non_alphanumeric_dropped() {
        assert_eq!(normalize("test_345%$*^&()+_sd^*()"), "test-345-sd");
    }

    #[test]
    fn test_truncation_keeps_suffix() {
        let name = format!("{}_123ab", "a".repeat(70));
        assert_eq!(normalize(&name), format!("{}-123ab", "a".repeat(57)));
    }

    #[test]
    fn test_leading_digit_gets_prefix() {
        assert_eq!(normalize("1st-rule"), "a1st-rule");
        assert_eq!(normalize(""), "a");
    }

    #[test]
    fn test_uppercase_and_trailing_hyphen() {
        assert_eq!(normalize("My_Network_"), "my-network");
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("my-network"));
        assert!(is_valid_name("a"));
        assert!(!is_valid_name("My-network"));
        assert!(!is_valid_name("network-"));
        assert!(!is_valid_name("1network"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"a".repeat(64)));
    }
}
