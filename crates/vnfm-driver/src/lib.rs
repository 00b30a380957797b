//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Crate root of the VNF lifecycle driver."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Lifecycle driver for VNFs deployed as orchestration stacks.
//!
//! [`LifecycleDriver`] turns instantiate, update, scale, heal and terminate
//! requests into calls on a [`vnfm_client::StackApi`] and a
//! [`vnfm_client::ImageApi`], waits for the remote side with a bounded
//! [`Poller`], and keeps the in-memory [`InstantiatedVnfInfo`] in step with
//! the live resources.
//!
//! ```ignore
//! let driver = LifecycleDriver::from_config(&config)?;
//! let mut vnf = VnfInstance::new("vnf-1");
//! let done = driver.instantiate(&mut vnf, &request).await?;
//! let token = driver.scale(&vnf, &policy).await?;
//! let ips = driver.scale_wait(&mut vnf, &policy, token.as_deref()).await?;
//! ```

pub mod compensate;
pub mod driver;
pub mod error;
pub mod heal;
pub mod image;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod reconcile;
pub mod scale;
pub mod template;
pub mod user_data;

pub use compensate::{compensate, CompensationOutcome};
pub use driver::{
    mgmt_ips_from_outputs, Instantiated, LifecycleDriver, LifecycleDriverBuilder,
    MGMT_IP_OUTPUT_PREFIX,
};
pub use error::{DriverError, ImageFailure, Result, WaitCause, WaitFailed, WaitKind};
pub use image::{ImageProvisioner, ProvisionedImages, IMAGE_RESOURCE_TYPE};
pub use metrics::{DriverMetrics, SharedRegistry};
pub use model::{
    ExtManagedVirtualLinkInfo, GrantInfo, HealVnfRequest, InstantiatedVnfInfo, ResourceHandle,
    ResourceStatus, ScaleAction, ScalePolicy, SoftwareImage, VirtualLinkResourceInfo,
    VirtualStorageResourceInfo, VnfInstance, VnfLinkPort, VnfResource, VnfVirtualLinkResourceInfo,
    VnfcCpInfo, VnfcResourceInfo, STACK_ID_KEY,
};
pub use poller::{Observed, Poller};
pub use reconcile::{reconcile, reconcile_vnfc, LiveResource, LiveResources};
pub use scale::SCALING_IN_PROGRESS_KEY;
pub use template::{InstantiateRequest, NativeTemplate, PassthroughTranslator, TemplateTranslator};
pub use user_data::{
    UserData, UserDataRef, UserDataRegistry, USER_DATA_CLASS_KEY, USER_DATA_PATH_KEY,
};
