//! ---
//! vnfm_section: "11-testing"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Scripted in-memory orchestration service."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use vnfm_client::{
    RemoteError, Result, ScaleEvent, Stack, StackApi, StackOutput, StackRequest, StackResource,
    StackStatus, StackUpdate,
};

/// One scripted answer to `get_stack`.
#[derive(Debug, Clone, PartialEq)]
pub enum StackStep {
    /// Report this status.
    Status(StackStatus),
    /// Answer 404.
    Missing,
    /// Answer with an HTTP error status.
    Error(u16),
}

impl From<StackStatus> for StackStep {
    fn from(status: StackStatus) -> Self {
        StackStep::Status(status)
    }
}

#[derive(Debug)]
struct FakeStack {
    snapshot: Stack,
    steps: VecDeque<StackStep>,
}

#[derive(Debug, Default)]
struct Inner {
    stacks: IndexMap<String, FakeStack>,
    resources: IndexMap<String, Vec<StackResource>>,
    events: IndexMap<(String, String), VecDeque<Option<ScaleEvent>>>,
    metadata: IndexMap<(String, String), Map<String, Value>>,
    failing_marks: HashSet<String>,
    failing_endpoints: HashSet<&'static str>,
    created: Vec<StackRequest>,
    updates: Vec<(String, StackUpdate)>,
    marks: Vec<(String, String)>,
    signals: Vec<(String, String)>,
    calls: IndexMap<&'static str, usize>,
    next_id: usize,
}

fn scripted_failure(endpoint: &str) -> RemoteError {
    RemoteError::Status {
        method: "FAKE".into(),
        url: endpoint.into(),
        status: 500,
        body: "scripted failure".into(),
    }
}

/// In-memory [`StackApi`] with scripted statuses and per-endpoint call counts.
///
/// `get_stack` consumes one [`StackStep`] per call; the last step repeats
/// forever. Stacks without steps report their snapshot status unchanged.
#[derive(Debug, Default)]
pub struct FakeStackApi {
    inner: Mutex<Inner>,
}

impl FakeStackApi {
    /// Empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stack with the given status.
    pub fn add_stack(&self, stack_id: &str, status: StackStatus) -> &Self {
        self.insert_stack(stack_id, status, None);
        self
    }

    /// Register a stack owned by `parent`.
    pub fn add_nested_stack(&self, parent: &str, stack_id: &str, status: StackStatus) -> &Self {
        self.insert_stack(stack_id, status, Some(parent.to_string()));
        self
    }

    fn insert_stack(&self, stack_id: &str, status: StackStatus, parent: Option<String>) {
        let snapshot = Stack {
            id: stack_id.to_string(),
            stack_name: stack_id.to_string(),
            stack_status: status,
            stack_status_reason: None,
            outputs: Vec::new(),
            parent,
        };
        self.inner.lock().stacks.insert(
            stack_id.to_string(),
            FakeStack {
                snapshot,
                steps: VecDeque::new(),
            },
        );
    }

    /// Script the answers of successive `get_stack` calls.
    pub fn script<I, S>(&self, stack_id: &str, steps: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StackStep>,
    {
        let mut inner = self.inner.lock();
        let stack = inner
            .stacks
            .entry(stack_id.to_string())
            .or_insert_with(|| FakeStack {
                snapshot: Stack {
                    id: stack_id.to_string(),
                    stack_name: stack_id.to_string(),
                    stack_status: StackStatus::CREATE_IN_PROGRESS,
                    stack_status_reason: None,
                    outputs: Vec::new(),
                    parent: None,
                },
                steps: VecDeque::new(),
            });
        stack.steps = steps.into_iter().map(Into::into).collect();
        drop(inner);
        self
    }

    /// Attach an output to a registered stack.
    pub fn add_output(&self, stack_id: &str, key: &str, value: Value) -> &Self {
        if let Some(stack) = self.inner.lock().stacks.get_mut(stack_id) {
            stack.snapshot.outputs.push(StackOutput {
                output_key: key.to_string(),
                output_value: value,
            });
        }
        self
    }

    /// Add a live resource to a stack.
    pub fn add_resource(
        &self,
        stack_id: &str,
        resource_name: &str,
        resource_type: &str,
        physical_id: &str,
    ) -> &Self {
        self.inner
            .lock()
            .resources
            .entry(stack_id.to_string())
            .or_default()
            .push(StackResource {
                resource_name: resource_name.to_string(),
                resource_type: resource_type.to_string(),
                physical_resource_id: physical_id.to_string(),
            });
        self
    }

    /// Script successive `latest_event` answers; the last one repeats.
    pub fn script_events<I>(&self, stack_id: &str, resource_name: &str, events: I) -> &Self
    where
        I: IntoIterator<Item = Option<(&'static str, StackStatus)>>,
    {
        let events = events
            .into_iter()
            .map(|event| {
                event.map(|(id, status)| ScaleEvent {
                    id: id.to_string(),
                    resource_status: status,
                    timestamp: Utc::now(),
                })
            })
            .collect();
        self.inner
            .lock()
            .events
            .insert((stack_id.to_string(), resource_name.to_string()), events);
        self
    }

    /// Set the metadata map of a resource.
    pub fn set_metadata(&self, stack_id: &str, resource_name: &str, metadata: Value) -> &Self {
        let map = match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.inner
            .lock()
            .metadata
            .insert((stack_id.to_string(), resource_name.to_string()), map);
        self
    }

    /// Make `mark_unhealthy` fail for the named resource.
    pub fn fail_mark_unhealthy(&self, resource_name: &str) -> &Self {
        self.inner
            .lock()
            .failing_marks
            .insert(resource_name.to_string());
        self
    }

    /// Make every call to the named endpoint fail with HTTP 500.
    pub fn fail_endpoint(&self, endpoint: &'static str) -> &Self {
        self.inner.lock().failing_endpoints.insert(endpoint);
        self
    }

    /// Number of calls made to an endpoint, named after the trait method.
    pub fn calls(&self, endpoint: &str) -> usize {
        self.inner.lock().calls.get(endpoint).copied().unwrap_or(0)
    }

    /// Total calls across all endpoints.
    pub fn total_calls(&self) -> usize {
        self.inner.lock().calls.values().sum()
    }

    /// `(stack_id, resource_name)` of every attempted unhealthy mark, in order.
    pub fn marks(&self) -> Vec<(String, String)> {
        self.inner.lock().marks.clone()
    }

    /// `(stack_id, resource_name)` of every signal, in order.
    pub fn signals(&self) -> Vec<(String, String)> {
        self.inner.lock().signals.clone()
    }

    /// Requests passed to `create_stack`.
    pub fn created(&self) -> Vec<StackRequest> {
        self.inner.lock().created.clone()
    }

    /// Updates passed to `update_stack`.
    pub fn updates(&self) -> Vec<(String, StackUpdate)> {
        self.inner.lock().updates.clone()
    }

    fn enter(&self, endpoint: &'static str) -> Result<parking_lot::MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock();
        *inner.calls.entry(endpoint).or_default() += 1;
        if inner.failing_endpoints.contains(endpoint) {
            return Err(scripted_failure(endpoint));
        }
        Ok(inner)
    }
}

fn not_found(what: String) -> RemoteError {
    RemoteError::NotFound { what }
}

#[async_trait]
impl StackApi for FakeStackApi {
    async fn create_stack(&self, request: &StackRequest) -> Result<String> {
        let mut inner = self.enter("create_stack")?;
        inner.next_id += 1;
        let id = format!("stack-{}", inner.next_id);
        inner.created.push(request.clone());
        if !inner.stacks.contains_key(&id) {
            inner.stacks.insert(
                id.clone(),
                FakeStack {
                    snapshot: Stack {
                        id: id.clone(),
                        stack_name: request.stack_name.clone(),
                        stack_status: StackStatus::CREATE_IN_PROGRESS,
                        stack_status_reason: None,
                        outputs: Vec::new(),
                        parent: None,
                    },
                    steps: VecDeque::new(),
                },
            );
        }
        Ok(id)
    }

    async fn update_stack(&self, stack_id: &str, update: &StackUpdate) -> Result<()> {
        let mut inner = self.enter("update_stack")?;
        if !inner.stacks.contains_key(stack_id) {
            return Err(not_found(format!("stack {stack_id}")));
        }
        inner.updates.push((stack_id.to_string(), update.clone()));
        Ok(())
    }

    async fn delete_stack(&self, stack_id: &str) -> Result<()> {
        let inner = self.enter("delete_stack")?;
        if !inner.stacks.contains_key(stack_id) {
            return Err(not_found(format!("stack {stack_id}")));
        }
        Ok(())
    }

    async fn get_stack(&self, stack_id: &str) -> Result<Stack> {
        let mut inner = self.enter("get_stack")?;
        let stack = inner
            .stacks
            .get_mut(stack_id)
            .ok_or_else(|| not_found(format!("stack {stack_id}")))?;
        let step = if stack.steps.len() > 1 {
            stack.steps.pop_front()
        } else {
            stack.steps.front().cloned()
        };
        match step {
            None => Ok(stack.snapshot.clone()),
            Some(StackStep::Status(status)) => {
                stack.snapshot.stack_status = status;
                Ok(stack.snapshot.clone())
            }
            Some(StackStep::Missing) => Err(not_found(format!("stack {stack_id}"))),
            Some(StackStep::Error(status)) => Err(RemoteError::Status {
                method: "GET".into(),
                url: format!("stacks/{stack_id}"),
                status,
                body: "scripted failure".into(),
            }),
        }
    }

    async fn list_resources(&self, stack_id: &str) -> Result<Vec<StackResource>> {
        let inner = self.enter("list_resources")?;
        if !inner.stacks.contains_key(stack_id) {
            return Err(not_found(format!("stack {stack_id}")));
        }
        Ok(inner.resources.get(stack_id).cloned().unwrap_or_default())
    }

    async fn get_resource(&self, stack_id: &str, resource_name: &str) -> Result<StackResource> {
        let inner = self.enter("get_resource")?;
        inner
            .resources
            .get(stack_id)
            .and_then(|resources| {
                resources
                    .iter()
                    .find(|resource| resource.resource_name == resource_name)
            })
            .cloned()
            .ok_or_else(|| not_found(format!("resource {resource_name} of stack {stack_id}")))
    }

    async fn list_nested_stacks(&self, owner_id: &str) -> Result<Vec<Stack>> {
        let inner = self.enter("list_nested_stacks")?;
        let mut owners = vec![owner_id.to_string()];
        let mut found = Vec::new();
        while let Some(owner) = owners.pop() {
            for stack in inner.stacks.values() {
                if stack.snapshot.parent.as_deref() == Some(owner.as_str()) {
                    owners.push(stack.snapshot.id.clone());
                    found.push(stack.snapshot.clone());
                }
            }
        }
        Ok(found)
    }

    async fn mark_unhealthy(
        &self,
        stack_id: &str,
        resource_name: &str,
        _reason: &str,
    ) -> Result<()> {
        let mut inner = self.enter("mark_unhealthy")?;
        inner
            .marks
            .push((stack_id.to_string(), resource_name.to_string()));
        if inner.failing_marks.contains(resource_name) {
            return Err(scripted_failure("mark_unhealthy"));
        }
        Ok(())
    }

    async fn latest_event(
        &self,
        stack_id: &str,
        resource_name: &str,
    ) -> Result<Option<ScaleEvent>> {
        let mut inner = self.enter("latest_event")?;
        let key = (stack_id.to_string(), resource_name.to_string());
        let Some(events) = inner.events.get_mut(&key) else {
            return Ok(None);
        };
        let event = if events.len() > 1 {
            events.pop_front().flatten()
        } else {
            events.front().cloned().flatten()
        };
        Ok(event)
    }

    async fn signal(&self, stack_id: &str, resource_name: &str) -> Result<()> {
        let mut inner = self.enter("signal")?;
        inner
            .signals
            .push((stack_id.to_string(), resource_name.to_string()));
        Ok(())
    }

    async fn resource_metadata(
        &self,
        stack_id: &str,
        resource_name: &str,
    ) -> Result<Map<String, Value>> {
        let inner = self.enter("resource_metadata")?;
        Ok(inner
            .metadata
            .get(&(stack_id.to_string(), resource_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_steps_advance_and_stick() {
        let api = FakeStackApi::new();
        api.add_stack("s1", StackStatus::CREATE_IN_PROGRESS).script(
            "s1",
            [
                StackStep::Status(StackStatus::CREATE_IN_PROGRESS),
                StackStep::Status(StackStatus::CREATE_COMPLETE),
            ],
        );

        assert_eq!(
            api.get_stack("s1").await.unwrap().stack_status,
            StackStatus::CREATE_IN_PROGRESS
        );
        for _ in 0..3 {
            assert_eq!(
                api.get_stack("s1").await.unwrap().stack_status,
                StackStatus::CREATE_COMPLETE
            );
        }
        assert_eq!(api.calls("get_stack"), 4);
    }

    #[tokio::test]
    async fn nested_listing_walks_descendants() {
        let api = FakeStackApi::new();
        api.add_stack("root", StackStatus::CREATE_COMPLETE)
            .add_nested_stack("root", "child", StackStatus::CREATE_COMPLETE)
            .add_nested_stack("child", "grandchild", StackStatus::CREATE_COMPLETE)
            .add_stack("other", StackStatus::CREATE_COMPLETE);

        let nested = api.list_nested_stacks("root").await.unwrap();
        let ids: Vec<_> = nested.iter().map(|stack| stack.id.as_str()).collect();
        assert_eq!(ids, vec!["child", "grandchild"]);
    }

    #[tokio::test]
    async fn failing_marks_are_still_recorded() {
        let api = FakeStackApi::new();
        api.add_stack("s1", StackStatus::CREATE_COMPLETE)
            .fail_mark_unhealthy("VDU1");
        assert!(api.mark_unhealthy("s1", "VDU1", "test").await.is_err());
        assert_eq!(api.marks(), vec![("s1".to_string(), "VDU1".to_string())]);
    }
}
