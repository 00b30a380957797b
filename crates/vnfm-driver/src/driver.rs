//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Lifecycle driver: instantiate, update and terminate flows."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use vnfm_client::{
    HttpImageClient, HttpStackClient, ImageApi, RemoteError, SourceDigest, Stack, StackApi,
    StackStatus, StackUpdate, StreamingDigest,
};
use vnfm_common::{DriverConfig, ImagePolicy, PollPolicy, WaitPolicies};
use vnfm_logging::{
    log_lifecycle_event, vnfm_debug, vnfm_info, vnfm_warn, LifecycleOutcome, LogContext,
};

use crate::compensate::compensate;
use crate::error::{DriverError, Result, StackWait, WaitKind};
use crate::image::{ImageProvisioner, ProvisionedImages, IMAGE_RESOURCE_TYPE};
use crate::metrics::DriverMetrics;
use crate::model::{GrantInfo, SoftwareImage, VnfInstance, VnfResource};
use crate::poller::Poller;
use crate::reconcile::{reconcile, LiveResources};
use crate::template::{
    InstantiateRequest, NativeTemplate, PassthroughTranslator, TemplateTranslator,
};
use crate::user_data::UserDataRegistry;

/// Output key prefix naming a VDU management address.
pub const MGMT_IP_OUTPUT_PREFIX: &str = "mgmt_ip-";

// A patch that changes nothing leaves the stack in its creation state.
const UPDATE_SETTLED: &[StackStatus] =
    &[StackStatus::UPDATE_COMPLETE, StackStatus::CREATE_COMPLETE];

/// Result of a full instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Instantiated {
    /// Id of the created top-level stack.
    pub stack_id: String,
    /// Images provisioned for the instance.
    pub images: ProvisionedImages,
}

/// Drives VNF lifecycle operations against the orchestration service and the
/// image store.
///
/// The driver holds no per-instance state; every operation receives the
/// [`VnfInstance`] it acts on, so independent instances can be driven
/// concurrently through one driver.
pub struct LifecycleDriver {
    pub(crate) stacks: Arc<dyn StackApi>,
    pub(crate) images: Arc<dyn ImageApi>,
    pub(crate) digest: Arc<dyn SourceDigest>,
    pub(crate) translator: Arc<dyn TemplateTranslator>,
    pub(crate) user_data: UserDataRegistry,
    pub(crate) waits: WaitPolicies,
    pub(crate) image_policy: ImagePolicy,
    pub(crate) metrics: Option<DriverMetrics>,
}

/// Builder for [`LifecycleDriver`].
pub struct LifecycleDriverBuilder {
    driver: LifecycleDriver,
}

impl LifecycleDriverBuilder {
    /// Start from the three remote collaborators, with default policies.
    pub fn new(
        stacks: Arc<dyn StackApi>,
        images: Arc<dyn ImageApi>,
        digest: Arc<dyn SourceDigest>,
    ) -> Self {
        Self {
            driver: LifecycleDriver {
                stacks,
                images,
                digest,
                translator: Arc::new(PassthroughTranslator),
                user_data: UserDataRegistry::new(),
                waits: WaitPolicies::default(),
                image_policy: ImagePolicy::default(),
                metrics: None,
            },
        }
    }

    /// Take wait and image policies from a loaded configuration.
    pub fn config(mut self, config: &DriverConfig) -> Self {
        self.driver.waits = config.waits;
        self.driver.image_policy = config.images;
        self
    }

    /// Per-operation stack wait policies.
    pub fn waits(mut self, waits: WaitPolicies) -> Self {
        self.driver.waits = waits;
        self
    }

    /// Image activation and cleanup policy.
    pub fn image_policy(mut self, policy: ImagePolicy) -> Self {
        self.driver.image_policy = policy;
        self
    }

    /// Descriptor translator used when no user-data hook is selected.
    pub fn translator(mut self, translator: Arc<dyn TemplateTranslator>) -> Self {
        self.driver.translator = translator;
        self
    }

    /// Available user-data hooks.
    pub fn user_data(mut self, registry: UserDataRegistry) -> Self {
        self.driver.user_data = registry;
        self
    }

    /// Publish metrics.
    pub fn metrics(mut self, metrics: DriverMetrics) -> Self {
        self.driver.metrics = Some(metrics);
        self
    }

    /// Finish.
    pub fn build(self) -> LifecycleDriver {
        self.driver
    }
}

impl LifecycleDriver {
    /// Builder over the given collaborators.
    pub fn builder(
        stacks: Arc<dyn StackApi>,
        images: Arc<dyn ImageApi>,
        digest: Arc<dyn SourceDigest>,
    ) -> LifecycleDriverBuilder {
        LifecycleDriverBuilder::new(stacks, images, digest)
    }

    /// Driver talking HTTP to the endpoints of `config`.
    pub fn from_config(config: &DriverConfig) -> std::result::Result<Self, RemoteError> {
        let stacks = HttpStackClient::new(&config.orchestration)?;
        let images = HttpImageClient::new(&config.image_store)?;
        let digest = StreamingDigest::new(config.image_store.request_timeout)?;
        Ok(
            Self::builder(Arc::new(stacks), Arc::new(images), Arc::new(digest))
                .config(config)
                .build(),
        )
    }

    /// Process startup: load the first configuration file found among
    /// `candidates` (or `VNFM_CONFIG`), install tracing for `service_name`
    /// and build the HTTP driver.
    pub fn bootstrap<P: AsRef<Path>>(
        service_name: &str,
        candidates: &[P],
    ) -> anyhow::Result<Self> {
        let loaded = DriverConfig::load_with_source(candidates)?;
        let installed = vnfm_common::init_tracing(service_name, &loaded.config.logging)?;
        vnfm_info!(
            "configuration loaded from {} (tracing installed: {installed})",
            loaded.source.display()
        );
        Self::from_config(&loaded.config).context("building lifecycle driver")
    }

    pub(crate) fn metrics(&self) -> Option<&DriverMetrics> {
        self.metrics.as_ref()
    }

    fn policy(&self, kind: WaitKind) -> PollPolicy {
        match kind {
            WaitKind::Create => self.waits.create,
            WaitKind::Update => self.waits.update,
            WaitKind::Delete => self.waits.delete,
            WaitKind::Heal => self.waits.heal,
            WaitKind::Scale => self.waits.scale,
            WaitKind::Image => self.image_policy.activation,
        }
    }

    pub(crate) fn scale_policy(&self) -> PollPolicy {
        self.policy(WaitKind::Scale)
    }

    pub(crate) fn stack_id_of<'v>(&self, vnf: &'v VnfInstance) -> Result<&'v str> {
        vnf.stack_id().ok_or_else(|| {
            DriverError::InvalidRequest(format!("vnf instance {} has no stack", vnf.id))
        })
    }

    /// Emit the closing lifecycle event of an operation and pass its result on.
    pub(crate) fn finish<T>(
        &self,
        ctx: &LogContext<'_>,
        event: &str,
        result: Result<T>,
    ) -> Result<T> {
        match &result {
            Ok(_) => log_lifecycle_event(Some(ctx), event, "completed", LifecycleOutcome::Success),
            Err(err) => log_lifecycle_event(
                Some(ctx),
                event,
                &format!("{}: {err}", err.kind()),
                LifecycleOutcome::Fault,
            ),
        }
        result
    }

    /// Poll `stack_id` of `vnf_instance_id` until it leaves the in-progress
    /// state.
    ///
    /// Success means reaching one of the `accept` statuses. Any other outcome
    /// is logged once at WARN and mapped to the `*WaitFailed` variant of
    /// `wait`. When `missing_is_deleted` is set, a stack that no longer
    /// exists counts as `DELETE_COMPLETE`.
    pub(crate) async fn wait_for_stack(
        &self,
        ctx: &LogContext<'_>,
        wait: StackWait,
        vnf_instance_id: &str,
        stack_id: &str,
        accept: &[StackStatus],
        missing_is_deleted: bool,
    ) -> Result<Stack> {
        let stacks = self.stacks.as_ref();
        let kind = WaitKind::from(wait);
        let result = Poller::new(kind, self.policy(kind))
            .with_metrics(self.metrics())
            .await_terminal(
                move || async move {
                    match stacks.get_stack(stack_id).await {
                        Err(err) if missing_is_deleted && err.is_not_found() => {
                            Ok(deleted_stack(stack_id))
                        }
                        other => other,
                    }
                },
                |stack: &Stack| stack.stack_status.is_terminal(),
                |stack: &Stack| accept.contains(&stack.stack_status),
            )
            .await;
        result.map_err(|failure| {
            vnfm_warn!(
                context = *ctx,
                "{} wait on stack {} failed: {}",
                kind,
                stack_id,
                failure
            );
            DriverError::from_wait(wait, vnf_instance_id, stack_id, failure)
        })
    }

    /// Refresh the management addresses of `vnf` from a completed stack.
    pub(crate) async fn refresh_mgmt_ip(
        &self,
        ctx: &LogContext<'_>,
        vnf: &mut VnfInstance,
        stack: &Stack,
    ) -> Result<()> {
        vnfm_debug!(context = *ctx, "outputs {:?}", stack.outputs);
        vnf.mgmt_ip_address = if vnf.scaling_groups.is_empty() {
            mgmt_ips_from_outputs(stack)
        } else {
            let groups: Vec<String> = vnf.scaling_groups.values().cloned().collect();
            let ips = self
                .group_mgmt_ips(&stack.id, groups.iter().map(String::as_str))
                .await
                .map_err(DriverError::remote("collect management addresses"))?;
            (!ips.is_empty()).then(|| encode(ips))
        };
        Ok(())
    }

    /// Management addresses of every member of the named scaling groups,
    /// as `{VDU: [ip, ...]}`.
    pub(crate) async fn group_mgmt_ips<'g>(
        &self,
        stack_id: &str,
        groups: impl Iterator<Item = &'g str>,
    ) -> std::result::Result<Map<String, Value>, RemoteError> {
        let mut ips = Map::new();
        for group in groups {
            let group_stack = self.stacks.get_resource(stack_id, group).await?;
            let members = self
                .stacks
                .list_resources(&group_stack.physical_resource_id)
                .await?;
            for member in members {
                let member_stack = self.stacks.get_stack(&member.physical_resource_id).await?;
                for (vdu, ip) in mgmt_outputs(&member_stack) {
                    if let Value::Array(list) = ips
                        .entry(vdu)
                        .or_insert_with(|| Value::Array(Vec::new()))
                    {
                        list.push(ip);
                    }
                }
            }
        }
        Ok(ips)
    }

    /// Provision the software images of a VNF, skipping granted nodes.
    pub async fn pre_instantiation_vnf(
        &self,
        vnf: &VnfInstance,
        images: &[SoftwareImage],
        grant: &GrantInfo,
    ) -> Result<ProvisionedImages> {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_operation("pre_instantiation");
        let result = ImageProvisioner::new(
            self.images.as_ref(),
            self.digest.as_ref(),
            &self.image_policy,
        )
        .with_metrics(self.metrics())
        .provision_all(&vnf.id, images, grant)
        .await;
        self.finish(&ctx, "vnf.pre_instantiation", result)
    }

    /// Render the stack template, through the selected user-data hook or
    /// the translator.
    pub fn render_template(&self, request: &InstantiateRequest) -> Result<NativeTemplate> {
        if let Some(rendered) = self.user_data.render(request)? {
            return Ok(rendered);
        }
        self.translator
            .translate(request)
            .map_err(DriverError::InvalidRequest)
    }

    /// Render the template and submit the stack creation. Returns the id of
    /// the new stack.
    pub async fn instantiate_vnf(
        &self,
        vnf: &VnfInstance,
        request: &InstantiateRequest,
    ) -> Result<String> {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_operation("instantiate");
        let result = match self.render_template(request) {
            Ok(template) => self.submit_create(&ctx, template, &request.stack_name).await,
            Err(err) => Err(err),
        };
        self.finish(&ctx, "vnf.instantiate", result)
    }

    async fn submit_create(
        &self,
        ctx: &LogContext<'_>,
        template: NativeTemplate,
        stack_name: &str,
    ) -> Result<String> {
        let stack_id = self
            .stacks
            .create_stack(&template.into_request(stack_name))
            .await
            .map_err(DriverError::remote("create stack"))?;
        vnfm_info!(context = *ctx, "stack {} submitted as {}", stack_name, stack_id);
        Ok(stack_id)
    }

    /// Wait for stack creation to complete and record the management
    /// addresses it reports.
    pub async fn create_wait(&self, vnf: &mut VnfInstance, stack_id: &str) -> Result<Stack> {
        let vnf_id = vnf.id.clone();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_stack(stack_id)
            .with_operation("create_wait");
        let result: Result<Stack> = async {
            let stack = self
                .wait_for_stack(
                    &ctx,
                    StackWait::Create,
                    &vnf_id,
                    stack_id,
                    &[StackStatus::CREATE_COMPLETE],
                    false,
                )
                .await?;
            self.refresh_mgmt_ip(&ctx, vnf, &stack).await?;
            Ok(stack)
        }
        .await;
        self.finish(&ctx, "vnf.create_wait", result)
    }

    /// Bind the physical ids of the created stack, and of all stacks nested
    /// in it, onto the topology of `vnf`.
    pub async fn post_vnf_instantiation(
        &self,
        vnf: &mut VnfInstance,
        stack_id: &str,
    ) -> Result<()> {
        let vnf_id = vnf.id.clone();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_stack(stack_id)
            .with_operation("post_instantiation");
        let result: Result<()> = async {
            let live = LiveResources::fetch(self.stacks.as_ref(), stack_id)
                .await
                .map_err(DriverError::remote("list stack resources"))?;
            let mut info = vnf.instantiated_vnf_info.clone().unwrap_or_default();
            info.instance_id = stack_id.to_string();
            reconcile(&mut info, &live);
            vnf.instantiated_vnf_info = Some(info);
            Ok(())
        }
        .await;
        self.finish(&ctx, "vnf.post_instantiation", result)
    }

    /// Full instantiation: validate, render, provision images, create the
    /// stack, wait for it and reconcile.
    ///
    /// Images provisioned before a failing stack creation are kept; they are
    /// released through [`LifecycleDriver::delete_vnf_instance_resource`]
    /// like any other instance resource.
    pub async fn instantiate(
        &self,
        vnf: &mut VnfInstance,
        request: &InstantiateRequest,
    ) -> Result<Instantiated> {
        let vnf_id = vnf.id.clone();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_operation("instantiate");
        let submitted: Result<(String, ProvisionedImages)> = async {
            check_instantiable(vnf, request)?;
            let template = self.render_template(request)?;
            let images = self
                .pre_instantiation_vnf(vnf, &request.software_images, &request.grant)
                .await?;
            let stack_id = self.submit_create(&ctx, template, &request.stack_name).await?;
            Ok((stack_id, images))
        }
        .await;
        let (stack_id, images) = self.finish(&ctx, "vnf.instantiate", submitted)?;

        self.create_wait(vnf, &stack_id).await?;
        self.post_vnf_instantiation(vnf, &stack_id).await?;
        Ok(Instantiated { stack_id, images })
    }

    /// Patch the stack of `vnf` with new parameters, keeping its template.
    pub async fn update(
        &self,
        vnf: &VnfInstance,
        parameters: IndexMap<String, Value>,
    ) -> Result<()> {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_operation("update");
        let result: Result<()> = async {
            let stack_id = self.stack_id_of(vnf)?;
            self.stacks
                .update_stack(
                    stack_id,
                    &StackUpdate {
                        template: None,
                        files: IndexMap::new(),
                        parameters,
                    },
                )
                .await
                .map_err(DriverError::remote("update stack"))
        }
        .await;
        self.finish(&ctx, "vnf.update", result)
    }

    /// Wait for the update to complete and refresh the management addresses.
    pub async fn update_wait(&self, vnf: &mut VnfInstance) -> Result<Stack> {
        let vnf_id = vnf.id.clone();
        let stack_id = self.stack_id_of(vnf)?.to_string();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_stack(&stack_id)
            .with_operation("update_wait");
        let result: Result<Stack> = async {
            let stack = self
                .wait_for_stack(
                    &ctx,
                    StackWait::Update,
                    &vnf_id,
                    &stack_id,
                    UPDATE_SETTLED,
                    false,
                )
                .await?;
            self.refresh_mgmt_ip(&ctx, vnf, &stack).await?;
            Ok(stack)
        }
        .await;
        self.finish(&ctx, "vnf.update_wait", result)
    }

    /// Submit deletion of the stack of `vnf`. A stack that is already gone
    /// is not an error.
    pub async fn delete(&self, vnf: &VnfInstance) -> Result<()> {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_operation("delete");
        let result: Result<()> = async {
            let stack_id = self.stack_id_of(vnf)?;
            match self.stacks.delete_stack(stack_id).await {
                Err(err) if err.is_not_found() => {
                    vnfm_info!(context = ctx, "stack {} is already gone", stack_id);
                    Ok(())
                }
                other => other.map_err(DriverError::remote("delete stack")),
            }
        }
        .await;
        self.finish(&ctx, "vnf.delete", result)
    }

    /// Wait until the stack of `vnf` is deleted.
    pub async fn delete_wait(&self, vnf: &VnfInstance) -> Result<()> {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_operation("delete_wait");
        let result: Result<()> = async {
            let stack_id = self.stack_id_of(vnf)?;
            self.wait_for_stack(
                &ctx,
                StackWait::Delete,
                &vnf.id,
                stack_id,
                &[StackStatus::DELETE_COMPLETE],
                true,
            )
            .await
            .map(|_| ())
        }
        .await;
        self.finish(&ctx, "vnf.delete_wait", result)
    }

    /// Delete a provisioned instance resource. Failures are retried up to the
    /// configured cleanup attempts, then only logged; this never fails.
    pub async fn delete_vnf_instance_resource(&self, vnf: &VnfInstance, resource: &VnfResource) {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_resource(&resource.resource_name)
            .with_operation("delete_resource");
        if resource.resource_type != IMAGE_RESOURCE_TYPE {
            vnfm_info!(
                context = ctx,
                "resource type {} is not managed by the driver, skipping",
                resource.resource_type
            );
            return;
        }

        let images = self.images.as_ref();
        let image_id = resource.resource_identifier.as_str();
        let outcome = compensate(
            "delete_image",
            image_id,
            self.image_policy.cleanup_attempts,
            self.metrics(),
            move |_| images.delete_image(image_id),
        )
        .await;
        if outcome.success {
            vnfm_info!(
                context = ctx,
                "image {} of resource {} deleted",
                image_id,
                resource.resource_name
            );
        }
    }
}

impl std::fmt::Debug for LifecycleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDriver")
            .field("waits", &self.waits)
            .field("image_policy", &self.image_policy)
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for LifecycleDriverBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDriverBuilder")
            .field("driver", &self.driver)
            .finish()
    }
}

fn deleted_stack(stack_id: &str) -> Stack {
    Stack {
        id: stack_id.to_string(),
        stack_name: stack_id.to_string(),
        stack_status: StackStatus::DELETE_COMPLETE,
        stack_status_reason: None,
        outputs: Vec::new(),
        parent: None,
    }
}

fn mgmt_outputs(stack: &Stack) -> impl Iterator<Item = (String, Value)> + '_ {
    stack.outputs.iter().filter_map(|output| {
        output
            .output_key
            .strip_prefix(MGMT_IP_OUTPUT_PREFIX)
            .map(|vdu| (vdu.to_string(), output.output_value.clone()))
    })
}

fn check_instantiable(vnf: &VnfInstance, request: &InstantiateRequest) -> Result<()> {
    if request.stack_name.trim().is_empty() {
        return Err(DriverError::InvalidRequest("stack name is empty".into()));
    }
    let Some(info) = vnf.instantiated_vnf_info.as_ref() else {
        return Ok(());
    };
    if let Some(duplicate) = info.duplicate_descriptor() {
        return Err(DriverError::InvalidRequest(format!(
            "descriptor id {duplicate} is declared more than once"
        )));
    }
    if let Some(duplicate) = info.duplicate_instance_id() {
        return Err(DriverError::InvalidRequest(format!(
            "instance id {duplicate} is declared more than once"
        )));
    }
    Ok(())
}

pub(crate) fn encode(map: Map<String, Value>) -> Bytes {
    Bytes::from(Value::Object(map).to_string())
}

/// `{VDU: ip}` from the `mgmt_ip-<VDU>` outputs of a stack, encoded as
/// compact JSON; `None` when the stack declares no such output.
pub fn mgmt_ips_from_outputs(stack: &Stack) -> Option<Bytes> {
    let ips: Map<String, Value> = mgmt_outputs(stack).collect();
    (!ips.is_empty()).then(|| encode(ips))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vnfm_client::StackOutput;

    use super::*;

    fn stack(outputs: Vec<(&str, Value)>) -> Stack {
        Stack {
            outputs: outputs
                .into_iter()
                .map(|(key, value)| StackOutput {
                    output_key: key.to_string(),
                    output_value: value,
                })
                .collect(),
            ..deleted_stack("s")
        }
    }

    #[test]
    fn mgmt_ips_are_taken_from_prefixed_outputs() {
        let stack = stack(vec![
            ("mgmt_ip-VDU1", json!("192.168.120.216")),
            ("other", json!("ignored")),
        ]);
        assert_eq!(
            mgmt_ips_from_outputs(&stack).unwrap(),
            Bytes::from_static(br#"{"VDU1":"192.168.120.216"}"#)
        );
    }

    #[test]
    fn no_mgmt_outputs_yields_none() {
        assert_eq!(mgmt_ips_from_outputs(&stack(vec![("other", json!(1))])), None);
        assert_eq!(mgmt_ips_from_outputs(&stack(Vec::new())), None);
    }
}
