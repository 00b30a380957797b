//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "test"
//! vnfm_scope: "code"
//! vnfm_description: "Shared fixtures for lifecycle driver integration tests."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use url::Url;
use vnfm_client::ImageSource;
use vnfm_common::{ImagePolicy, PollPolicy, WaitPolicies};
use vnfm_driver::{
    InstantiatedVnfInfo, LifecycleDriver, LifecycleDriverBuilder, ResourceHandle, SoftwareImage,
    VirtualStorageResourceInfo, VnfInstance, VnfcResourceInfo,
};
use vnfm_testharness::{FakeDigest, FakeImageApi, FakeStackApi};

pub const VNF_ID: &str = "vnf-1";
pub const STACK_ID: &str = "stack-1";

/// A driver wired to fresh fakes.
pub struct Harness {
    pub stacks: Arc<FakeStackApi>,
    pub images: Arc<FakeImageApi>,
    pub digest: Arc<FakeDigest>,
    pub driver: LifecycleDriver,
}

pub fn fast(retries: u32) -> PollPolicy {
    PollPolicy::new(retries, Duration::from_millis(1))
}

pub fn harness_with(
    configure: impl FnOnce(LifecycleDriverBuilder) -> LifecycleDriverBuilder,
) -> Harness {
    let stacks = Arc::new(FakeStackApi::new());
    let images = Arc::new(FakeImageApi::new());
    let digest = Arc::new(FakeDigest::new());
    let builder = LifecycleDriver::builder(stacks.clone(), images.clone(), digest.clone())
        .waits(WaitPolicies::uniform(fast(5)))
        .image_policy(ImagePolicy {
            activation: fast(5),
            cleanup_attempts: 2,
        });
    Harness {
        stacks,
        images,
        digest,
        driver: configure(builder).build(),
    }
}

pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

/// One compute unit `vnfc-1` (VDU1) with one attached volume `vs-1`.
pub fn topology(stack_id: &str) -> InstantiatedVnfInfo {
    InstantiatedVnfInfo {
        instance_id: stack_id.to_string(),
        vnfc_resource_info: vec![VnfcResourceInfo {
            id: "vnfc-1".into(),
            vdu_id: "VDU1".into(),
            storage_resource_ids: vec!["vs-1".into()],
            ..Default::default()
        }],
        virtual_storage_resource_info: vec![VirtualStorageResourceInfo {
            id: "vs-1".into(),
            virtual_storage_desc_id: "VirtualStorage".into(),
            storage_resource: ResourceHandle::default(),
        }],
        ..Default::default()
    }
}

pub fn instantiated_vnf(stack_id: &str) -> VnfInstance {
    VnfInstance {
        instantiated_vnf_info: Some(topology(stack_id)),
        ..VnfInstance::new(VNF_ID)
    }
}

pub fn url_image(node: &str, name: &str) -> SoftwareImage {
    let url = Url::parse(&format!("http://images.test/{name}.qcow2")).expect("valid url");
    SoftwareImage {
        node: node.to_string(),
        name: name.to_string(),
        source: ImageSource::Url(url),
        disk_format: "qcow2".into(),
        container_format: "bare".into(),
        min_disk: 1,
        min_ram: 512,
    }
}
