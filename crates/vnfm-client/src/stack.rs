//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Orchestration-service API and its HTTP binding."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;
use vnfm_common::OrchestrationConfig;

use crate::error::Result;
use crate::http::Endpoint;
use crate::types::{ScaleEvent, Stack, StackRequest, StackResource, StackUpdate};

/// Calls the lifecycle driver makes against the stack-orchestration service.
#[async_trait]
pub trait StackApi: Send + Sync + 'static {
    /// Create a stack and return its id.
    async fn create_stack(&self, request: &StackRequest) -> Result<String>;

    /// Patch an existing stack.
    async fn update_stack(&self, stack_id: &str, update: &StackUpdate) -> Result<()>;

    /// Request deletion of a stack.
    async fn delete_stack(&self, stack_id: &str) -> Result<()>;

    /// Fetch the current stack snapshot.
    async fn get_stack(&self, stack_id: &str) -> Result<Stack>;

    /// List the stack's own resources, without descending into nested stacks.
    async fn list_resources(&self, stack_id: &str) -> Result<Vec<StackResource>>;

    /// Fetch one resource by template name.
    async fn get_resource(&self, stack_id: &str, resource_name: &str) -> Result<StackResource>;

    /// List stacks owned by `owner_id`, at any nesting depth.
    async fn list_nested_stacks(&self, owner_id: &str) -> Result<Vec<Stack>>;

    /// Flag a resource for replacement on the next update.
    async fn mark_unhealthy(&self, stack_id: &str, resource_name: &str, reason: &str)
        -> Result<()>;

    /// Most recent event of a resource, if it has any.
    async fn latest_event(&self, stack_id: &str, resource_name: &str)
        -> Result<Option<ScaleEvent>>;

    /// Send a signal to a resource, e.g. a scaling policy.
    async fn signal(&self, stack_id: &str, resource_name: &str) -> Result<()>;

    /// Read a resource's metadata map.
    async fn resource_metadata(
        &self,
        stack_id: &str,
        resource_name: &str,
    ) -> Result<Map<String, Value>>;
}

#[derive(Deserialize)]
struct StackEnvelope {
    stack: Stack,
}

#[derive(Deserialize)]
struct CreatedStack {
    id: String,
}

#[derive(Deserialize)]
struct CreatedEnvelope {
    stack: CreatedStack,
}

#[derive(Deserialize)]
struct StacksEnvelope {
    stacks: Vec<Stack>,
}

#[derive(Deserialize)]
struct ResourcesEnvelope {
    resources: Vec<StackResource>,
}

#[derive(Deserialize)]
struct ResourceEnvelope {
    resource: StackResource,
}

#[derive(Deserialize)]
struct EventsEnvelope {
    events: Vec<ScaleEvent>,
}

#[derive(Deserialize)]
struct MetadataEnvelope {
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// `reqwest` implementation of [`StackApi`].
#[derive(Debug, Clone)]
pub struct HttpStackClient {
    endpoint: Endpoint,
}

impl HttpStackClient {
    /// Build a client for the configured orchestration endpoint.
    pub fn new(config: &OrchestrationConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config.endpoint.clone(), config.request_timeout)?,
        })
    }

    fn resource_url(&self, stack_id: &str, resource_name: &str, tail: &[&str]) -> Result<Url> {
        let mut segments = vec!["stacks", stack_id, "resources", resource_name];
        segments.extend_from_slice(tail);
        self.endpoint.url_segments(&segments)
    }
}

#[async_trait]
impl StackApi for HttpStackClient {
    async fn create_stack(&self, request: &StackRequest) -> Result<String> {
        let url = self.endpoint.url("stacks")?;
        let created: CreatedEnvelope = self
            .endpoint
            .send_json(
                self.endpoint.request(Method::POST, url).json(request),
                &format!("stack {}", request.stack_name),
            )
            .await?;
        Ok(created.stack.id)
    }

    async fn update_stack(&self, stack_id: &str, update: &StackUpdate) -> Result<()> {
        let url = self.endpoint.url_segments(&["stacks", stack_id])?;
        self.endpoint
            .send(
                self.endpoint.request(Method::PATCH, url).json(update),
                &format!("stack {stack_id}"),
            )
            .await?;
        Ok(())
    }

    async fn delete_stack(&self, stack_id: &str) -> Result<()> {
        let url = self.endpoint.url_segments(&["stacks", stack_id])?;
        self.endpoint
            .send(
                self.endpoint.request(Method::DELETE, url),
                &format!("stack {stack_id}"),
            )
            .await?;
        Ok(())
    }

    async fn get_stack(&self, stack_id: &str) -> Result<Stack> {
        let url = self.endpoint.url_segments(&["stacks", stack_id])?;
        let envelope: StackEnvelope = self
            .endpoint
            .send_json(
                self.endpoint.request(Method::GET, url),
                &format!("stack {stack_id}"),
            )
            .await?;
        Ok(envelope.stack)
    }

    async fn list_resources(&self, stack_id: &str) -> Result<Vec<StackResource>> {
        let url = self.endpoint.url_segments(&["stacks", stack_id, "resources"])?;
        let envelope: ResourcesEnvelope = self
            .endpoint
            .send_json(
                self.endpoint.request(Method::GET, url),
                &format!("stack {stack_id}"),
            )
            .await?;
        Ok(envelope.resources)
    }

    async fn get_resource(&self, stack_id: &str, resource_name: &str) -> Result<StackResource> {
        let url = self.resource_url(stack_id, resource_name, &[])?;
        let envelope: ResourceEnvelope = self
            .endpoint
            .send_json(
                self.endpoint.request(Method::GET, url),
                &format!("resource {resource_name} of stack {stack_id}"),
            )
            .await?;
        Ok(envelope.resource)
    }

    async fn list_nested_stacks(&self, owner_id: &str) -> Result<Vec<Stack>> {
        let url = self.endpoint.url("stacks")?;
        let envelope: StacksEnvelope = self
            .endpoint
            .send_json(
                self.endpoint
                    .request(Method::GET, url)
                    .query(&[("owner_id", owner_id), ("show_nested", "true")]),
                &format!("stacks owned by {owner_id}"),
            )
            .await?;
        Ok(envelope.stacks)
    }

    async fn mark_unhealthy(
        &self,
        stack_id: &str,
        resource_name: &str,
        reason: &str,
    ) -> Result<()> {
        let url = self.resource_url(stack_id, resource_name, &[])?;
        let body = json!({
            "mark_unhealthy": true,
            "resource_status_reason": reason,
        });
        self.endpoint
            .send(
                self.endpoint.request(Method::PATCH, url).json(&body),
                &format!("resource {resource_name} of stack {stack_id}"),
            )
            .await?;
        Ok(())
    }

    async fn latest_event(
        &self,
        stack_id: &str,
        resource_name: &str,
    ) -> Result<Option<ScaleEvent>> {
        let url = self.resource_url(stack_id, resource_name, &["events"])?;
        let envelope: EventsEnvelope = self
            .endpoint
            .send_json(
                self.endpoint.request(Method::GET, url).query(&[
                    ("limit", "1"),
                    ("sort_keys", "event_time"),
                    ("sort_dir", "desc"),
                ]),
                &format!("events of resource {resource_name} in stack {stack_id}"),
            )
            .await?;
        Ok(envelope.events.into_iter().next())
    }

    async fn signal(&self, stack_id: &str, resource_name: &str) -> Result<()> {
        let url = self.resource_url(stack_id, resource_name, &["signal"])?;
        self.endpoint
            .send(
                self.endpoint.request(Method::POST, url).json(&json!({})),
                &format!("resource {resource_name} of stack {stack_id}"),
            )
            .await?;
        Ok(())
    }

    async fn resource_metadata(
        &self,
        stack_id: &str,
        resource_name: &str,
    ) -> Result<Map<String, Value>> {
        let url = self.resource_url(stack_id, resource_name, &["metadata"])?;
        let envelope: MetadataEnvelope = self
            .endpoint
            .send_json(
                self.endpoint.request(Method::GET, url),
                &format!("resource {resource_name} of stack {stack_id}"),
            )
            .await?;
        Ok(envelope.metadata)
    }
}
