//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "test"
//! vnfm_scope: "code"
//! vnfm_description: "Create, update and delete waits against a scripted orchestration service."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
mod common;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::json;
use tracing::Level;
use vnfm_client::{StackAction, StackState, StackStatus};
use vnfm_common::WaitPolicies;
use vnfm_driver::{DriverError, VnfInstance, WaitCause};
use vnfm_testharness::{LogCapture, StackStep};

use common::{fast, harness, harness_with, instantiated_vnf, STACK_ID, VNF_ID};

#[tokio::test]
async fn create_wait_records_management_addresses() {
    let h = harness();
    h.stacks
        .add_stack(STACK_ID, StackStatus::CREATE_IN_PROGRESS)
        .add_output(STACK_ID, "mgmt_ip-VDU1", json!("192.168.120.216"))
        .add_output(STACK_ID, "other", json!("ignored"))
        .script(
            STACK_ID,
            [StackStatus::CREATE_IN_PROGRESS, StackStatus::CREATE_COMPLETE],
        );
    let mut vnf = VnfInstance::new(VNF_ID);

    let stack = h.driver.create_wait(&mut vnf, STACK_ID).await.unwrap();

    assert_eq!(stack.stack_status, StackStatus::CREATE_COMPLETE);
    assert_eq!(
        vnf.mgmt_ip_address,
        Some(Bytes::from_static(br#"{"VDU1":"192.168.120.216"}"#))
    );
    assert_eq!(h.stacks.calls("get_stack"), 2);
}

#[tokio::test]
async fn create_wait_without_outputs_leaves_no_address() {
    let h = harness();
    h.stacks.add_stack(STACK_ID, StackStatus::CREATE_COMPLETE);
    let mut vnf = VnfInstance::new(VNF_ID);

    h.driver.create_wait(&mut vnf, STACK_ID).await.unwrap();

    assert_eq!(vnf.mgmt_ip_address, None);
    assert_eq!(h.stacks.calls("get_stack"), 1);
}

#[tokio::test]
async fn create_wait_failure_warns_once() {
    let h = harness();
    h.stacks.script(
        STACK_ID,
        [StackStatus::CREATE_IN_PROGRESS, StackStatus::CREATE_FAILED],
    );
    let logs = LogCapture::default();
    let _guard = logs.install();
    let mut vnf = VnfInstance::new(VNF_ID);

    let err = h.driver.create_wait(&mut vnf, STACK_ID).await.unwrap_err();

    match err {
        DriverError::VnfCreateWaitFailed {
            vnf_instance_id,
            stack_id,
            source,
        } => {
            assert_eq!(vnf_instance_id, VNF_ID);
            assert_eq!(stack_id, STACK_ID);
            assert_eq!(source.attempts, 2);
            assert!(
                matches!(source.cause, WaitCause::Failed(ref status) if status == "CREATE_FAILED")
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(logs.count(Level::WARN), 1);
}

#[tokio::test]
async fn create_wait_on_missing_stack_fails_without_retrying() {
    let h = harness();
    h.stacks.script(STACK_ID, [StackStep::Missing]);
    let logs = LogCapture::default();
    let _guard = logs.install();
    let mut vnf = VnfInstance::new(VNF_ID);

    let err = h.driver.create_wait(&mut vnf, STACK_ID).await.unwrap_err();

    match err {
        DriverError::VnfCreateWaitFailed { source, .. } => {
            assert!(
                matches!(source.cause, WaitCause::Remote(ref remote) if remote.is_not_found())
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.stacks.calls("get_stack"), 1);
    assert_eq!(logs.count(Level::WARN), 1);
}

#[tokio::test]
async fn create_wait_gives_up_after_the_retry_budget() {
    let h = harness_with(|builder| builder.waits(WaitPolicies::uniform(fast(3))));
    h.stacks.add_stack(STACK_ID, StackStatus::CREATE_IN_PROGRESS);
    let mut vnf = VnfInstance::new(VNF_ID);

    let err = h.driver.create_wait(&mut vnf, STACK_ID).await.unwrap_err();

    match err {
        DriverError::VnfCreateWaitFailed { source, .. } => {
            assert_eq!(source.attempts, 3);
            assert!(matches!(source.cause, WaitCause::Exhausted));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.stacks.calls("get_stack"), 3);
}

#[tokio::test]
async fn create_wait_collects_addresses_of_scaling_group_members() {
    let h = harness();
    h.stacks
        .add_stack(STACK_ID, StackStatus::CREATE_COMPLETE)
        .add_resource(STACK_ID, "SP1_group", "OS::Heat::AutoScalingGroup", "group-stack")
        .add_nested_stack(STACK_ID, "group-stack", StackStatus::CREATE_COMPLETE)
        .add_resource("group-stack", "member-a", "vdu.yaml", "member-1")
        .add_resource("group-stack", "member-b", "vdu.yaml", "member-2")
        .add_nested_stack("group-stack", "member-1", StackStatus::CREATE_COMPLETE)
        .add_nested_stack("group-stack", "member-2", StackStatus::CREATE_COMPLETE)
        .add_output("member-1", "mgmt_ip-VDU1", json!("10.0.0.1"))
        .add_output("member-2", "mgmt_ip-VDU1", json!("10.0.0.2"));
    let mut vnf = VnfInstance::new(VNF_ID);
    vnf.scaling_groups.insert("SP1".into(), "SP1_group".into());

    h.driver.create_wait(&mut vnf, STACK_ID).await.unwrap();

    assert_eq!(
        vnf.mgmt_ip_address,
        Some(Bytes::from_static(br#"{"VDU1":["10.0.0.1","10.0.0.2"]}"#))
    );
}

#[tokio::test]
async fn update_submits_parameters_and_waits_for_completion() {
    let h = harness();
    h.stacks
        .add_stack(STACK_ID, StackStatus::CREATE_COMPLETE)
        .add_output(STACK_ID, "mgmt_ip-VDU1", json!("10.0.0.9"));
    let mut vnf = instantiated_vnf(STACK_ID);

    let mut parameters = IndexMap::new();
    parameters.insert("flavor".to_string(), json!("m1.large"));
    h.driver.update(&vnf, parameters).await.unwrap();
    h.stacks.script(
        STACK_ID,
        [StackStatus::UPDATE_IN_PROGRESS, StackStatus::UPDATE_COMPLETE],
    );
    let stack = h.driver.update_wait(&mut vnf).await.unwrap();

    let updates = h.stacks.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, STACK_ID);
    assert_eq!(updates[0].1.template, None);
    assert_eq!(updates[0].1.parameters["flavor"], json!("m1.large"));
    assert_eq!(stack.stack_status, StackStatus::UPDATE_COMPLETE);
    assert_eq!(
        vnf.mgmt_ip_address,
        Some(Bytes::from_static(br#"{"VDU1":"10.0.0.9"}"#))
    );
}

#[tokio::test]
async fn update_wait_accepts_an_unchanged_stack() {
    let h = harness();
    h.stacks.add_stack(STACK_ID, StackStatus::CREATE_COMPLETE);
    let mut vnf = instantiated_vnf(STACK_ID);

    let stack = h.driver.update_wait(&mut vnf).await.unwrap();

    assert_eq!(stack.stack_status, StackStatus::CREATE_COMPLETE);
}

#[tokio::test]
async fn update_wait_failure_maps_to_update_error() {
    let h = harness();
    h.stacks.script(
        STACK_ID,
        [StackStatus::new(StackAction::Update, StackState::Failed)],
    );
    let logs = LogCapture::default();
    let _guard = logs.install();
    let mut vnf = instantiated_vnf(STACK_ID);

    let err = h.driver.update_wait(&mut vnf).await.unwrap_err();

    assert!(matches!(err, DriverError::VnfUpdateWaitFailed { .. }), "{err:?}");
    assert_eq!(err.kind(), "VNFUpdateWaitFailed");
    assert_eq!(logs.count(Level::WARN), 1);
}

#[tokio::test]
async fn operations_on_a_vnf_without_stack_are_rejected() {
    let h = harness();
    let mut vnf = VnfInstance::new(VNF_ID);

    assert!(matches!(
        h.driver.update_wait(&mut vnf).await,
        Err(DriverError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.driver.delete(&vnf).await,
        Err(DriverError::InvalidRequest(_))
    ));
    assert_eq!(h.stacks.total_calls(), 0);
}

#[tokio::test]
async fn delete_wait_succeeds_once_the_stack_is_gone() {
    let h = harness();
    h.stacks
        .add_stack(STACK_ID, StackStatus::CREATE_COMPLETE)
        .script(
            STACK_ID,
            [StackStep::from(StackStatus::DELETE_IN_PROGRESS), StackStep::Missing],
        );
    let vnf = instantiated_vnf(STACK_ID);

    h.driver.delete(&vnf).await.unwrap();
    h.driver.delete_wait(&vnf).await.unwrap();

    assert_eq!(h.stacks.calls("delete_stack"), 1);
    assert_eq!(h.stacks.calls("get_stack"), 2);
}

#[tokio::test]
async fn delete_of_an_already_deleted_stack_succeeds() {
    let h = harness();
    let vnf = instantiated_vnf(STACK_ID);

    h.driver.delete(&vnf).await.unwrap();

    assert_eq!(h.stacks.calls("delete_stack"), 1);
}

#[tokio::test]
async fn delete_wait_accepts_delete_complete() {
    let h = harness();
    h.stacks.script(
        STACK_ID,
        [StackStatus::DELETE_IN_PROGRESS, StackStatus::DELETE_COMPLETE],
    );

    h.driver
        .delete_wait(&instantiated_vnf(STACK_ID))
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_wait_exhaustion_warns_once() {
    let h = harness_with(|builder| builder.waits(WaitPolicies::uniform(fast(2))));
    h.stacks.add_stack(STACK_ID, StackStatus::DELETE_IN_PROGRESS);
    let logs = LogCapture::default();
    let _guard = logs.install();

    let err = h
        .driver
        .delete_wait(&instantiated_vnf(STACK_ID))
        .await
        .unwrap_err();

    assert!(
        err.to_string()
            .starts_with("VNF Delete action failed for vnf vnf-1 on stack stack-1"),
        "{err}"
    );
    match err {
        DriverError::VnfDeleteWaitFailed { source, .. } => {
            assert!(matches!(source.cause, WaitCause::Exhausted));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.stacks.calls("get_stack"), 2);
    assert_eq!(logs.count(Level::WARN), 1);
}

#[tokio::test]
async fn delete_wait_on_bare_failed_status_warns_once() {
    let h = harness();
    h.stacks.script(
        STACK_ID,
        [StackStatus::DELETE_IN_PROGRESS, StackStatus::FAILED],
    );
    let logs = LogCapture::default();
    let _guard = logs.install();

    let err = h
        .driver
        .delete_wait(&instantiated_vnf(STACK_ID))
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::VnfDeleteWaitFailed { .. }), "{err:?}");
    assert_eq!(logs.count(Level::WARN), 1);
    assert_eq!(logs.count_matching(Level::ERROR, "VNFDeleteWaitFailed"), 1);
}
