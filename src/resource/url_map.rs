//! URL maps

use serde::Deserialize;
use serde_json::{json, Value};

use super::fetcher;
use super::{ResourceHandle, RestResource, Verb};
use crate::constants::NAME;
use crate::error::{GcpError, OperationError, OperationResult};
use crate::gcp::client::{encode, GcpClient};
use crate::host::NodeContext;
use crate::lifecycle::{create_resource, delete_if_not_external, pending, resolve_name, CreateOutcome, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct UrlMap {
    pub handle: ResourceHandle,
    /// Self link of the backend service used when no path rule matches
    pub default_service: Option<String>,
}

impl UrlMap {
    pub fn new(handle: ResourceHandle, default_service: Option<String>) -> Self {
        Self {
            handle,
            default_service,
        }
    }

    fn collection_url(&self, client: &GcpClient) -> String {
        client.compute_global_url(&self.handle.project, "urlMaps")
    }

    fn item_url(&self, client: &GcpClient) -> String {
        client.compute_global_url(
            &self.handle.project,
            &format!("urlMaps/{}", encode(&self.handle.name)),
        )
    }
}

impl RestResource for UrlMap {
    const KIND: &'static str = "URL map";

    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ResourceHandle {
        &mut self.handle
    }

    fn to_representation(&self) -> Value {
        json!({
            "name": self.handle.name,
            "description": "Generated URL map",
            "defaultService": self.default_service,
        })
    }

    async fn create(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Create URL map {}", self.handle.name);
        client
            .post(&self.collection_url(client), Some(&self.to_representation()))
            .await
    }

    async fn get(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::debug!("Get URL map {} details", self.handle.name);
        client.get(&self.item_url(client)).await
    }

    async fn delete(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Delete URL map {}", self.handle.name);
        client.delete(&self.item_url(client)).await
    }

    async fn list(&self, client: &GcpClient) -> Result<Vec<Value>, GcpError> {
        tracing::debug!("List URL maps in project {}", self.handle.project);
        fetcher::fetch_all(client, &self.collection_url(client), &[], "items").await
    }

    async fn update(&self, client: &GcpClient) -> Result<Value, GcpError> {
        tracing::info!("Update URL map {}", self.handle.name);
        client
            .put(&self.item_url(client), &self.to_representation())
            .await
    }

    fn update_model(&mut self, body: Value) {
        if let Some(service) = body.get("defaultService").and_then(|v| v.as_str()) {
            self.default_service = Some(service.to_string());
        }
        self.handle.body = Some(body);
    }
}

/// Inputs of a URL map node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlMapProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default_service: Option<String>,
}

/// A URL map cannot be created without a default backend service
pub fn creation_validation(props: &UrlMapProperties) -> OperationResult {
    match props.default_service.as_deref() {
        Some(service) if !service.is_empty() => Ok(()),
        _ => Err(OperationError::non_recoverable(
            "A default backend service must be supplied as default_service",
        )),
    }
}

/// Create the URL map, finishing across host retries
pub async fn create(ctx: &mut NodeContext, client: &GcpClient, props: &UrlMapProperties) -> OperationResult {
    let policy = RetryPolicy::for_node(ctx);
    let name = match ctx.runtime().get_str(NAME) {
        Some(name) => name.to_string(),
        None => resolve_name(ctx, props.name.as_deref())?,
    };
    let handle = ResourceHandle::global(&name, &client.project_id).with_external(ctx.use_external_resource());
    let mut url_map = UrlMap::new(handle, props.default_service.clone());
    let label = url_map.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Create, &label).await?.is_none() {
        match create_resource(ctx, &mut url_map, client, &policy).await? {
            CreateOutcome::Existing(body) => {
                ctx.runtime_mut().merge(&body);
                ctx.runtime_mut().insert(NAME, url_map.name());
                return Ok(());
            },
            CreateOutcome::Issued(response) => {
                ctx.runtime_mut().insert(NAME, url_map.name());
                pending::await_later(ctx, Verb::Create, response, &policy, "UrlMap is not yet created")?;
            },
        }
    }

    let body = policy.check(
        ctx,
        &label,
        url_map.get(client).await,
        &format!("Retrying fetching {}", label),
    )?;
    ctx.runtime_mut().merge(&body);
    Ok(())
}

/// Point the URL map at a new default service
pub async fn update(ctx: &mut NodeContext, client: &GcpClient, props: &UrlMapProperties) -> OperationResult {
    creation_validation(props)?;
    let Some(name) = ctx.runtime().get_str(NAME).map(str::to_string) else {
        return Err(OperationError::non_recoverable("UrlMap has not been created"));
    };
    if ctx.use_external_resource() {
        return Err(OperationError::non_recoverable(format!(
            "UrlMap {} is external and cannot be updated",
            name
        )));
    }

    let policy = RetryPolicy::for_node(ctx);
    let url_map = UrlMap::new(
        ResourceHandle::global(&name, &client.project_id),
        props.default_service.clone(),
    );
    let label = url_map.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Update, &label).await?.is_none() {
        let response = policy.check(
            ctx,
            &label,
            url_map.update(client).await,
            &format!("Retrying updating {}", label),
        )?;
        pending::await_later(ctx, Verb::Update, response, &policy, "UrlMap is not yet updated")?;
    }

    let body = policy.check(
        ctx,
        &label,
        url_map.get(client).await,
        &format!("Retrying fetching {}", label),
    )?;
    ctx.runtime_mut().merge(&body);
    Ok(())
}

pub async fn delete(ctx: &mut NodeContext, client: &GcpClient) -> OperationResult {
    let Some(name) = ctx.runtime().get_str(NAME).map(str::to_string) else {
        return Ok(());
    };

    let policy = RetryPolicy::for_node(ctx);
    let handle = ResourceHandle::global(&name, &client.project_id).with_external(ctx.use_external_resource());
    let url_map = UrlMap::new(handle, None);
    let label = url_map.describe();

    if pending::poll_stored(ctx, client, &policy, Verb::Delete, &label).await?.is_none() {
        if let Some(response) = delete_if_not_external(ctx, &url_map, client, &policy).await? {
            pending::await_later(ctx, Verb::Delete, response, &policy, "UrlMap is not yet deleted")?;
        }
    }

    ctx.runtime_mut().remove(NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_representation() {
        let url_map = UrlMap::new(
            ResourceHandle::global("web-map", "p"),
            Some("global/backendServices/web".to_string()),
        );
        assert_eq!(
            url_map.to_representation(),
            json!({
                "name": "web-map",
                "description": "Generated URL map",
                "defaultService": "global/backendServices/web",
            })
        );
    }

    #[test]
    fn test_creation_validation() {
        let missing = UrlMapProperties::default();
        let err = creation_validation(&missing).unwrap_err();
        assert!(!err.is_retry());

        let empty = UrlMapProperties {
            name: None,
            default_service: Some(String::new()),
        };
        assert!(creation_validation(&empty).is_err());

        let ok = UrlMapProperties {
            name: Some("m".into()),
            default_service: Some("global/backendServices/web".into()),
        };
        assert!(creation_validation(&ok).is_ok());
    }
}
