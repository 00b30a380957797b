//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Heal coordinator: mark, update, wait and rebind."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use indexmap::IndexMap;
use vnfm_client::{Stack, StackStatus, StackUpdate};
use vnfm_logging::{vnfm_info, LogContext};

use crate::driver::LifecycleDriver;
use crate::error::{DriverError, Result, StackWait};
use crate::model::{HealVnfRequest, InstantiatedVnfInfo, ResourceHandle, VnfInstance};
use crate::reconcile::{reconcile_vnfc, LiveResources};

const HEALABLE: [StackStatus; 2] = [StackStatus::CREATE_COMPLETE, StackStatus::UPDATE_COMPLETE];
const DEFAULT_CAUSE: &str = "Healing";

/// A live resource to mark unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HealTarget {
    stack_id: String,
    resource_name: String,
}

fn heal_failed(vnf_instance_id: &str, reason: String) -> DriverError {
    DriverError::VnfHealFailed {
        vnf_instance_id: vnf_instance_id.to_string(),
        reason,
    }
}

fn topology(vnf: &VnfInstance) -> Result<&InstantiatedVnfInfo> {
    vnf.instantiated_vnf_info.as_ref().ok_or_else(|| {
        DriverError::InvalidRequest(format!("vnf instance {} is not instantiated", vnf.id))
    })
}

/// Resources backing the requested compute units and their storage, each
/// attributed to the stack that owns it. Unknown units are rejected.
fn heal_targets(
    info: &InstantiatedVnfInfo,
    request: &HealVnfRequest,
    live: &LiveResources,
    top_stack: &str,
) -> Result<Vec<HealTarget>> {
    let target = |name: &str, handle: &ResourceHandle| HealTarget {
        stack_id: live
            .locate(name, handle)
            .map_or(top_stack, |found| found.stack_id)
            .to_string(),
        resource_name: name.to_string(),
    };

    let mut targets = Vec::new();
    for vnfc_id in &request.vnfc_instance_id {
        let vnfc = info
            .vnfc_resource_info
            .iter()
            .find(|vnfc| &vnfc.id == vnfc_id)
            .ok_or_else(|| {
                DriverError::InvalidRequest(format!("unknown vnfc instance {vnfc_id}"))
            })?;
        targets.push(target(&vnfc.vdu_id, &vnfc.compute_resource));
        for storage in info
            .virtual_storage_resource_info
            .iter()
            .filter(|storage| vnfc.storage_resource_ids.contains(&storage.id))
        {
            targets.push(target(
                &storage.virtual_storage_desc_id,
                &storage.storage_resource,
            ));
        }
    }
    Ok(targets)
}

impl LifecycleDriver {
    /// Mark the resources of the requested compute units unhealthy and
    /// trigger a stack update that replaces them.
    ///
    /// The stack must be `CREATE_COMPLETE` or `UPDATE_COMPLETE`. The first
    /// failing mark aborts the heal; marks already applied stay in place and
    /// take effect with the next update.
    pub async fn heal_vnf(&self, vnf: &VnfInstance, request: &HealVnfRequest) -> Result<()> {
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_operation("heal");
        let result: Result<()> = async {
            let stack_id = self.stack_id_of(vnf)?;
            let info = topology(vnf)?;

            let stack = self
                .stacks
                .get_stack(stack_id)
                .await
                .map_err(DriverError::remote("get stack"))?;
            if !HEALABLE.contains(&stack.stack_status) {
                return Err(heal_failed(
                    &vnf.id,
                    format!(
                        "Healing of vnf instance {} is possible only when stack {} status is \
                         CREATE_COMPLETE,UPDATE_COMPLETE, current stack status is {}",
                        vnf.id, stack_id, stack.stack_status
                    ),
                ));
            }

            let live = LiveResources::fetch(self.stacks.as_ref(), stack_id)
                .await
                .map_err(DriverError::remote("list stack resources"))?;
            let cause = request.cause.as_deref().unwrap_or(DEFAULT_CAUSE);
            for target in heal_targets(info, request, &live, stack_id)? {
                self.stacks
                    .mark_unhealthy(&target.stack_id, &target.resource_name, cause)
                    .await
                    .map_err(|err| {
                        heal_failed(
                            &vnf.id,
                            format!(
                                "Failed to mark stack '{}' resource as unhealthy for resource \
                                 '{}', Error: {}",
                                target.stack_id, target.resource_name, err
                            ),
                        )
                    })?;
                vnfm_info!(
                    context = LogContext::new()
                        .with_vnf_instance(&vnf.id)
                        .with_stack(&target.stack_id)
                        .with_resource(&target.resource_name),
                    "resource {} marked unhealthy",
                    target.resource_name
                );
            }

            self.stacks
                .update_stack(
                    stack_id,
                    &StackUpdate {
                        template: None,
                        files: IndexMap::new(),
                        parameters: IndexMap::new(),
                    },
                )
                .await
                .map_err(DriverError::remote("heal stack update"))
        }
        .await;
        self.finish(&ctx, "vnf.heal", result)
    }

    /// Wait for the heal update to complete and refresh the management
    /// addresses.
    pub async fn heal_vnf_wait(&self, vnf: &mut VnfInstance) -> Result<Stack> {
        let vnf_id = vnf.id.clone();
        let stack_id = self.stack_id_of(vnf)?.to_string();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_stack(&stack_id)
            .with_operation("heal_wait");
        let result: Result<Stack> = async {
            let stack = self
                .wait_for_stack(
                    &ctx,
                    StackWait::Heal,
                    &vnf_id,
                    &stack_id,
                    &[StackStatus::UPDATE_COMPLETE],
                    false,
                )
                .await?;
            self.refresh_mgmt_ip(&ctx, vnf, &stack).await?;
            Ok(stack)
        }
        .await;
        self.finish(&ctx, "vnf.heal_wait", result)
    }

    /// Rebind the healed compute units against the stack recorded on each of
    /// them, which may be a nested stack rather than the top-level one.
    pub async fn post_heal_vnf(
        &self,
        vnf: &mut VnfInstance,
        request: &HealVnfRequest,
    ) -> Result<()> {
        let vnf_id = vnf.id.clone();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_operation("post_heal");
        let result: Result<()> = async {
            let top_stack = self.stack_id_of(vnf)?.to_string();
            let mut info = topology(vnf)?.clone();
            let live = LiveResources::fetch(self.stacks.as_ref(), &top_stack)
                .await
                .map_err(DriverError::remote("list stack resources"))?;

            for vnfc_id in &request.vnfc_instance_id {
                let stack_id = info
                    .vnfc_resource_info
                    .iter()
                    .find(|vnfc| &vnfc.id == vnfc_id)
                    .map(|vnfc| vnfc.stack_id().unwrap_or(&top_stack).to_string())
                    .ok_or_else(|| {
                        DriverError::InvalidRequest(format!("unknown vnfc instance {vnfc_id}"))
                    })?;
                let resources = live.stack(&stack_id).ok_or_else(|| {
                    heal_failed(
                        &vnf_id,
                        format!(
                            "Heal Vnf failed for vnf {}, error: Failed to find stack_id {}",
                            vnf_id, stack_id
                        ),
                    )
                })?;
                reconcile_vnfc(&mut info, vnfc_id, &stack_id, resources);
            }

            vnf.instantiated_vnf_info = Some(info);
            Ok(())
        }
        .await;
        self.finish(&ctx, "vnf.post_heal", result)
    }

    /// Full heal: mark and update, wait, then rebind.
    pub async fn heal(&self, vnf: &mut VnfInstance, request: &HealVnfRequest) -> Result<Stack> {
        self.heal_vnf(vnf, request).await?;
        let stack = self.heal_vnf_wait(vnf).await?;
        self.post_heal_vnf(vnf, request).await?;
        Ok(stack)
    }
}
