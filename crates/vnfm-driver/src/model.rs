//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "In-memory VNF topology model."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
//! Declarative VNF topology and the records of remote artifacts the driver
//! manages. Physical resource ids inside [`InstantiatedVnfInfo`] are written
//! only by the reconciler.

use std::collections::HashSet;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use vnfm_client::ImageSource;

/// Metadata key recording which stack produced a compute resource.
pub const STACK_ID_KEY: &str = "stack_id";

/// Weak reference to a remote object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Physical id; empty until bound.
    #[serde(default)]
    pub resource_id: String,
    /// Infrastructure-level type, e.g. `OS::Nova::Server`.
    #[serde(default)]
    pub vim_level_resource_type: Option<String>,
}

impl ResourceHandle {
    /// Handle pointing at a known physical id.
    pub fn new(resource_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            vim_level_resource_type: Some(resource_type.into()),
        }
    }

    /// True once a physical id has been bound.
    pub fn is_bound(&self) -> bool {
        !self.resource_id.is_empty()
    }
}

/// Connection point of a compute unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VnfcCpInfo {
    /// Instance id, referenced by link ports through `cp_instance_id`.
    pub id: String,
    /// Connection point descriptor id; names the port resource in the template.
    pub cpd_id: String,
    /// Link port this connection point attaches to.
    #[serde(default)]
    pub vnf_link_port_id: Option<String>,
}

/// One compute unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VnfcResourceInfo {
    /// Instance id, selected by heal requests.
    pub id: String,
    /// VDU descriptor id; names the compute resource in the template.
    pub vdu_id: String,
    /// Bound compute resource.
    #[serde(default)]
    pub compute_resource: ResourceHandle,
    /// Ids of the [`VirtualStorageResourceInfo`] entries attached to this unit.
    #[serde(default)]
    pub storage_resource_ids: Vec<String>,
    /// Connection points.
    #[serde(default)]
    pub vnfc_cp_info: Vec<VnfcCpInfo>,
    /// Free-form metadata; carries [`STACK_ID_KEY`] after reconciliation.
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
}

impl VnfcResourceInfo {
    /// Stack that produced the compute resource, once reconciled.
    pub fn stack_id(&self) -> Option<&str> {
        self.metadata.get(STACK_ID_KEY).and_then(Value::as_str)
    }
}

/// One storage unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualStorageResourceInfo {
    /// Instance id.
    pub id: String,
    /// Storage descriptor id; names the volume resource in the template.
    pub virtual_storage_desc_id: String,
    /// Bound storage resource.
    #[serde(default)]
    pub storage_resource: ResourceHandle,
}

/// Port on a virtual link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VnfLinkPort {
    /// Port id.
    pub id: String,
    /// Id of the [`VnfcCpInfo`] using this port.
    #[serde(default)]
    pub cp_instance_id: Option<String>,
    /// Bound port resource.
    #[serde(default)]
    pub resource_handle: ResourceHandle,
}

/// Internal or externally managed virtual link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualLinkResourceInfo {
    /// Instance id.
    pub id: String,
    /// Virtual link descriptor id; names the network resource in the template.
    pub vnf_virtual_link_desc_id: String,
    /// Bound network resource.
    #[serde(default)]
    pub network_resource: ResourceHandle,
    /// Ports on the link.
    #[serde(default)]
    pub vnf_link_ports: Vec<VnfLinkPort>,
}

/// Internal virtual link.
pub type VnfVirtualLinkResourceInfo = VirtualLinkResourceInfo;
/// Externally managed virtual link.
pub type ExtManagedVirtualLinkInfo = VirtualLinkResourceInfo;

/// Live topology of an instantiated VNF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstantiatedVnfInfo {
    /// Id of the top-level stack.
    #[serde(default)]
    pub instance_id: String,
    /// Compute units.
    #[serde(default)]
    pub vnfc_resource_info: Vec<VnfcResourceInfo>,
    /// Storage units.
    #[serde(default)]
    pub virtual_storage_resource_info: Vec<VirtualStorageResourceInfo>,
    /// Internal virtual links.
    #[serde(default)]
    pub vnf_virtual_link_resource_info: Vec<VnfVirtualLinkResourceInfo>,
    /// Externally managed virtual links.
    #[serde(default)]
    pub ext_managed_virtual_link_info: Vec<ExtManagedVirtualLinkInfo>,
}

fn first_repeated<'a>(mut ids: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut seen = HashSet::new();
    ids.find(|id| !seen.insert(*id)).map(str::to_string)
}

impl InstantiatedVnfInfo {
    /// First descriptor id repeated within one collection. Reconciliation
    /// binds by descriptor id, so a repeat would bind two entries to one
    /// live resource.
    pub fn duplicate_descriptor(&self) -> Option<String> {
        first_repeated(self.vnfc_resource_info.iter().map(|v| v.vdu_id.as_str()))
            .or_else(|| {
                first_repeated(
                    self.virtual_storage_resource_info
                        .iter()
                        .map(|s| s.virtual_storage_desc_id.as_str()),
                )
            })
            .or_else(|| {
                first_repeated(
                    self.vnf_virtual_link_resource_info
                        .iter()
                        .map(|l| l.vnf_virtual_link_desc_id.as_str()),
                )
            })
            .or_else(|| {
                first_repeated(
                    self.ext_managed_virtual_link_info
                        .iter()
                        .map(|l| l.vnf_virtual_link_desc_id.as_str()),
                )
            })
    }

    /// First instance id repeated among compute or among storage entries.
    pub fn duplicate_instance_id(&self) -> Option<String> {
        first_repeated(self.vnfc_resource_info.iter().map(|v| v.id.as_str())).or_else(|| {
            first_repeated(
                self.virtual_storage_resource_info
                    .iter()
                    .map(|s| s.id.as_str()),
            )
        })
    }
}

/// A VNF instance and its current topology.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VnfInstance {
    /// Instance id.
    pub id: String,
    /// Current topology; replaced wholesale by each successful operation.
    pub instantiated_vnf_info: Option<InstantiatedVnfInfo>,
    /// Compact JSON of the management addresses, `None` when the stack
    /// declares none.
    pub mgmt_ip_address: Option<Bytes>,
    /// Scaling groups of the VNF keyed by policy name; when present,
    /// management addresses are collected from the group members.
    pub scaling_groups: IndexMap<String, String>,
}

impl VnfInstance {
    /// New instance with no topology yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Id of the top-level stack, once instantiated.
    pub fn stack_id(&self) -> Option<&str> {
        self.instantiated_vnf_info
            .as_ref()
            .map(|info| info.instance_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Pre-allocated resource handles keyed by template node name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantInfo(IndexMap<String, Vec<ResourceHandle>>);

impl GrantInfo {
    /// Empty grant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a granted handle for `node`.
    pub fn grant(mut self, node: impl Into<String>, handle: ResourceHandle) -> Self {
        self.0.entry(node.into()).or_default().push(handle);
        self
    }

    /// Whether `node` already has at least one granted handle.
    pub fn is_granted(&self, node: &str) -> bool {
        self.0.get(node).is_some_and(|handles| !handles.is_empty())
    }

    /// Granted handles for `node`.
    pub fn handles(&self, node: &str) -> &[ResourceHandle] {
        self.0.get(node).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Status of a managed remote artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    /// The artifact exists and is usable.
    Created,
}

/// Record of one remote artifact owned by a VNF instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnfResource {
    /// Record id.
    pub id: Uuid,
    /// Artifact name, e.g. the image name.
    pub resource_name: String,
    /// Artifact kind, e.g. `image`.
    pub resource_type: String,
    /// Remote id of the artifact.
    pub resource_identifier: String,
    /// Current status.
    pub resource_status: ResourceStatus,
    /// Owning VNF instance.
    pub vnf_instance_id: String,
}

/// A software image declared by a VDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareImage {
    /// Template node the image belongs to; checked against the grant.
    pub node: String,
    /// Image name.
    pub name: String,
    /// Where the image bytes come from.
    pub source: ImageSource,
    /// Disk format, e.g. `qcow2`.
    pub disk_format: String,
    /// Container format, e.g. `bare`.
    pub container_format: String,
    /// Minimum disk size in GiB.
    pub min_disk: u64,
    /// Minimum RAM in MiB.
    pub min_ram: u64,
}

/// Heal request selecting compute units to replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealVnfRequest {
    /// Ids of the [`VnfcResourceInfo`] entries to heal.
    pub vnfc_instance_id: Vec<String>,
    /// Free-form reason, forwarded as the unhealthy-mark reason.
    pub cause: Option<String>,
}

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    /// Add members.
    Out,
    /// Remove members.
    In,
}

impl ScaleAction {
    /// Suffix used in the policy resource name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleAction::Out => "scale_out",
            ScaleAction::In => "scale_in",
        }
    }
}

/// Scaling policy to signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePolicy {
    /// Stack owning the policy resources.
    pub stack_id: String,
    /// Policy name, e.g. `SP1`.
    pub name: String,
    /// Direction.
    pub action: ScaleAction,
    /// Scaling group name; defaults to `{name}_group`.
    pub group: Option<String>,
}

impl ScalePolicy {
    /// Name of the resource receiving the signal, `{name}_{action}`.
    pub fn resource_name(&self) -> String {
        format!("{}_{}", self.name, self.action.as_str())
    }

    /// Name of the scaling group resource.
    pub fn group_name(&self) -> String {
        self.group
            .clone()
            .unwrap_or_else(|| format!("{}_group", self.name))
    }
}
