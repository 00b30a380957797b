//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "test"
//! vnfm_scope: "code"
//! vnfm_description: "Heal flow: precondition, unhealthy marks, wait and rebind."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
mod common;

use std::time::Duration;

use serde_json::{json, Value};
use tracing::Level;
use vnfm_client::StackStatus;
use vnfm_common::{PollPolicy, WaitPolicies};
use vnfm_driver::{DriverError, HealVnfRequest, ResourceHandle, VnfInstance, STACK_ID_KEY};
use vnfm_testharness::LogCapture;

use common::{harness, harness_with, instantiated_vnf, Harness, STACK_ID};

const CHILD: &str = "child-1";

/// Top-level stack owning one nested stack that holds VDU1 and its volume.
fn nested_deployment(h: &Harness, status: StackStatus) {
    h.stacks
        .add_stack(STACK_ID, status)
        .add_resource(STACK_ID, "VDU1_group", "OS::Heat::ResourceGroup", CHILD)
        .add_nested_stack(STACK_ID, CHILD, StackStatus::CREATE_COMPLETE)
        .add_resource(CHILD, "VDU1", "OS::Nova::Server", "server-2")
        .add_resource(CHILD, "VirtualStorage", "OS::Cinder::Volume", "volume-2");
}

/// `vnfc-1` bound to the resources it had before the heal.
fn bound_vnf() -> VnfInstance {
    let mut vnf = instantiated_vnf(STACK_ID);
    if let Some(info) = vnf.instantiated_vnf_info.as_mut() {
        let vnfc = &mut info.vnfc_resource_info[0];
        vnfc.compute_resource = ResourceHandle::new("server-1", "OS::Nova::Server");
        vnfc.metadata
            .insert(STACK_ID_KEY.to_string(), Value::from(CHILD));
        info.virtual_storage_resource_info[0].storage_resource =
            ResourceHandle::new("volume-1", "OS::Cinder::Volume");
    }
    vnf
}

fn heal_vnfc_1() -> HealVnfRequest {
    HealVnfRequest {
        vnfc_instance_id: vec!["vnfc-1".into()],
        cause: Some("healthcheck failed".into()),
    }
}

fn reason(err: DriverError) -> String {
    match err {
        DriverError::VnfHealFailed { reason, .. } => reason,
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn heal_requires_a_settled_stack() {
    let h = harness();
    nested_deployment(&h, StackStatus::UPDATE_IN_PROGRESS);

    let err = h
        .driver
        .heal_vnf(&bound_vnf(), &heal_vnfc_1())
        .await
        .unwrap_err();

    assert_eq!(
        reason(err),
        "Healing of vnf instance vnf-1 is possible only when stack stack-1 status is \
         CREATE_COMPLETE,UPDATE_COMPLETE, current stack status is UPDATE_IN_PROGRESS"
    );
    assert_eq!(h.stacks.calls("mark_unhealthy"), 0);
    assert_eq!(h.stacks.calls("update_stack"), 0);
}

#[tokio::test]
async fn heal_marks_compute_and_storage_in_the_owning_stack_then_updates() {
    let h = harness();
    nested_deployment(&h, StackStatus::CREATE_COMPLETE);

    h.driver
        .heal_vnf(&bound_vnf(), &heal_vnfc_1())
        .await
        .unwrap();

    assert_eq!(
        h.stacks.marks(),
        vec![
            (CHILD.to_string(), "VDU1".to_string()),
            (CHILD.to_string(), "VirtualStorage".to_string()),
        ]
    );
    let updates = h.stacks.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, STACK_ID);
    assert!(updates[0].1.parameters.is_empty());
    assert_eq!(
        h.stacks.calls("mark_unhealthy") + h.stacks.calls("update_stack"),
        3
    );
}

#[tokio::test]
async fn first_failing_mark_aborts_the_heal() {
    let h = harness();
    nested_deployment(&h, StackStatus::UPDATE_COMPLETE);
    h.stacks.fail_mark_unhealthy("VDU1");

    let err = h
        .driver
        .heal_vnf(&bound_vnf(), &heal_vnfc_1())
        .await
        .unwrap_err();

    let reason = reason(err);
    assert!(
        reason.starts_with(
            "Failed to mark stack 'child-1' resource as unhealthy for resource 'VDU1', Error: "
        ),
        "{reason}"
    );
    assert_eq!(h.stacks.calls("mark_unhealthy"), 1);
    assert_eq!(h.stacks.calls("update_stack"), 0);
}

#[tokio::test]
async fn unknown_vnfc_is_rejected_before_any_mark() {
    let h = harness();
    nested_deployment(&h, StackStatus::CREATE_COMPLETE);
    let request = HealVnfRequest {
        vnfc_instance_id: vec!["vnfc-9".into()],
        cause: None,
    };

    let err = h
        .driver
        .heal_vnf(&bound_vnf(), &request)
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::InvalidRequest(_)), "{err:?}");
    assert_eq!(h.stacks.calls("mark_unhealthy"), 0);
}

#[tokio::test]
async fn heal_wait_timeout_names_budget_and_stack() {
    let h = harness_with(|builder| {
        builder.waits(WaitPolicies {
            heal: PollPolicy::new(1, Duration::from_secs(10)),
            ..WaitPolicies::default()
        })
    });
    h.stacks.add_stack(STACK_ID, StackStatus::UPDATE_IN_PROGRESS);
    let logs = LogCapture::default();
    let _guard = logs.install();
    let mut vnf = bound_vnf();

    let err = h.driver.heal_vnf_wait(&mut vnf).await.unwrap_err();

    assert!(matches!(err, DriverError::VnfHealWaitFailed { .. }), "{err:?}");
    assert!(
        err.to_string().starts_with(
            "VNF Heal action is not completed within 10 seconds on stack stack-1 for vnf vnf-1"
        ),
        "{err}"
    );
    assert_eq!(logs.count(Level::WARN), 1);
}

#[tokio::test]
async fn post_heal_rebinds_against_the_recorded_nested_stack() {
    let h = harness();
    nested_deployment(&h, StackStatus::UPDATE_COMPLETE);
    let mut vnf = bound_vnf();

    h.driver
        .post_heal_vnf(&mut vnf, &heal_vnfc_1())
        .await
        .unwrap();

    let info = vnf.instantiated_vnf_info.unwrap();
    assert_eq!(info.vnfc_resource_info[0].compute_resource.resource_id, "server-2");
    assert_eq!(info.vnfc_resource_info[0].stack_id(), Some(CHILD));
    assert_eq!(
        info.virtual_storage_resource_info[0].storage_resource.resource_id,
        "volume-2"
    );
}

#[tokio::test]
async fn post_heal_fails_when_the_recorded_stack_is_gone() {
    let h = harness();
    nested_deployment(&h, StackStatus::UPDATE_COMPLETE);
    let mut vnf = bound_vnf();
    if let Some(info) = vnf.instantiated_vnf_info.as_mut() {
        info.vnfc_resource_info[0]
            .metadata
            .insert(STACK_ID_KEY.to_string(), Value::from("stack-gone"));
    }
    let before = vnf.instantiated_vnf_info.clone();

    let err = h
        .driver
        .post_heal_vnf(&mut vnf, &heal_vnfc_1())
        .await
        .unwrap_err();

    assert_eq!(
        reason(err),
        "Heal Vnf failed for vnf vnf-1, error: Failed to find stack_id stack-gone"
    );
    assert_eq!(vnf.instantiated_vnf_info, before);
}

#[tokio::test]
async fn full_heal_marks_waits_and_rebinds() {
    let h = harness();
    nested_deployment(&h, StackStatus::CREATE_COMPLETE);
    h.stacks
        .add_output(STACK_ID, "mgmt_ip-VDU1", json!("192.168.120.31"))
        .script(
            STACK_ID,
            [
                StackStatus::CREATE_COMPLETE,
                StackStatus::UPDATE_IN_PROGRESS,
                StackStatus::UPDATE_COMPLETE,
            ],
        );
    let mut vnf = bound_vnf();

    let stack = h.driver.heal(&mut vnf, &heal_vnfc_1()).await.unwrap();

    assert_eq!(stack.stack_status, StackStatus::UPDATE_COMPLETE);
    assert_eq!(h.stacks.marks().len(), 2);
    assert_eq!(h.stacks.updates().len(), 1);
    assert_eq!(
        vnf.mgmt_ip_address.as_deref(),
        Some(br#"{"VDU1":"192.168.120.31"}"#.as_slice())
    );
    let info = vnf.instantiated_vnf_info.unwrap();
    assert_eq!(info.vnfc_resource_info[0].compute_resource.resource_id, "server-2");
}
