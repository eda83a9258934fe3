//! Resource Fetcher
//!
//! Paginated listing of GCP collections. List calls return one page at a
//! time with a `nextPageToken`; the helpers here follow it until exhausted.

use serde_json::Value;

use crate::error::GcpError;
use crate::gcp::client::{with_query, GcpClient};

/// Result of one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginatedResult {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Fetch every page of `url`, collecting the array found at `items_path`
/// (dot-separated, e.g. `rrsets`)
pub async fn fetch_all(
    client: &GcpClient,
    url: &str,
    params: &[(&str, Option<&str>)],
    items_path: &str,
) -> Result<Vec<Value>, GcpError> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let result = fetch_page(client, url, params, items_path, page_token.as_deref()).await?;
        all_items.extend(result.items);

        if result.next_token.is_none() {
            break;
        }
        page_token = result.next_token;
    }

    Ok(all_items)
}

/// Fetch one page
pub async fn fetch_page(
    client: &GcpClient,
    url: &str,
    params: &[(&str, Option<&str>)],
    items_path: &str,
    page_token: Option<&str>,
) -> Result<PaginatedResult, GcpError> {
    let mut query = params.to_vec();
    query.push(("pageToken", page_token));
    let url = with_query(url, &query)?;

    let response = client.get(&url).await?;

    let next_token = response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(PaginatedResult {
        items: extract_items(&response, items_path),
        next_token,
    })
}

/// Array at a dot-separated path; empty when any segment is missing
pub fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_items() {
        let response = json!({"rrsets": [{"name": "a."}, {"name": "b."}]});
        assert_eq!(extract_items(&response, "rrsets").len(), 2);
        assert!(extract_items(&response, "items").is_empty());
        assert!(extract_items(&json!({}), "rrsets").is_empty());
    }

    #[test]
    fn test_extract_nested_items() {
        let response = json!({"result": {"items": [1, 2, 3]}});
        assert_eq!(extract_items(&response, "result.items"), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(extract_items(&json!([4]), ""), vec![json!(4)]);
    }
}
