//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Binding of live physical resource ids onto the topology model."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
//! Reconciliation is a pure function of the topology and a snapshot of live
//! stack resources. Entities whose descriptor id names no live resource are
//! left as they are.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use vnfm_client::{RemoteError, StackApi, StackResource};

use crate::model::{
    InstantiatedVnfInfo, ResourceHandle, VirtualLinkResourceInfo, VirtualStorageResourceInfo,
    VnfcResourceInfo, STACK_ID_KEY,
};

/// Live resources of a stack and all of its nested stacks, keyed by stack id
/// in discovery order (top-level stack first).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveResources {
    stacks: IndexMap<String, Vec<StackResource>>,
}

/// A live resource together with the stack that owns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveResource<'a> {
    /// Owning stack.
    pub stack_id: &'a str,
    /// The resource.
    pub resource: &'a StackResource,
}

impl LiveResources {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the resources of one stack.
    pub fn with_stack(
        mut self,
        stack_id: impl Into<String>,
        resources: Vec<StackResource>,
    ) -> Self {
        self.stacks.insert(stack_id.into(), resources);
        self
    }

    /// Snapshot `stack_id` and every stack nested below it.
    pub async fn fetch(stacks: &dyn StackApi, stack_id: &str) -> Result<Self, RemoteError> {
        let mut live = Self::new().with_stack(stack_id, stacks.list_resources(stack_id).await?);
        for nested in stacks.list_nested_stacks(stack_id).await? {
            let resources = stacks.list_resources(&nested.id).await?;
            live.stacks.insert(nested.id, resources);
        }
        Ok(live)
    }

    /// Whether `stack_id` is part of the snapshot.
    pub fn contains_stack(&self, stack_id: &str) -> bool {
        self.stacks.contains_key(stack_id)
    }

    /// Resources of one stack.
    pub fn stack(&self, stack_id: &str) -> Option<&[StackResource]> {
        self.stacks.get(stack_id).map(Vec::as_slice)
    }

    /// Every resource across all stacks, in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = LiveResource<'_>> {
        self.stacks.iter().flat_map(|(stack_id, resources)| {
            resources.iter().map(move |resource| LiveResource {
                stack_id: stack_id.as_str(),
                resource,
            })
        })
    }

    /// Locate the live resource backing a unit: by physical id when the
    /// handle is bound, otherwise by name.
    pub fn locate(&self, name: &str, handle: &ResourceHandle) -> Option<LiveResource<'_>> {
        if handle.is_bound() {
            if let Some(found) = self
                .iter()
                .find(|live| live.resource.physical_resource_id == handle.resource_id)
            {
                return Some(found);
            }
        }
        self.iter().find(|live| live.resource.resource_name == name)
    }

    fn by_name(&self) -> HashMap<&str, LiveResource<'_>> {
        let mut index = HashMap::new();
        for live in self.iter() {
            if live.resource.physical_resource_id.is_empty() {
                continue;
            }
            index
                .entry(live.resource.resource_name.as_str())
                .or_insert(live);
        }
        index
    }
}

fn bind(handle: &mut ResourceHandle, resource: &StackResource) {
    handle.resource_id = resource.physical_resource_id.clone();
    handle.vim_level_resource_type = Some(resource.resource_type.clone());
}

fn bind_vnfc(vnfc: &mut VnfcResourceInfo, live: LiveResource<'_>) {
    bind(&mut vnfc.compute_resource, live.resource);
    vnfc.metadata
        .insert(STACK_ID_KEY.to_string(), Value::from(live.stack_id));
}

fn bind_links(
    links: &mut [VirtualLinkResourceInfo],
    cpd_by_cp: &HashMap<String, String>,
    index: &HashMap<&str, LiveResource<'_>>,
) {
    for link in links {
        if let Some(live) = index.get(link.vnf_virtual_link_desc_id.as_str()) {
            bind(&mut link.network_resource, live.resource);
        }
        for port in &mut link.vnf_link_ports {
            let Some(cpd_id) = port
                .cp_instance_id
                .as_deref()
                .and_then(|cp| cpd_by_cp.get(cp))
            else {
                continue;
            };
            if let Some(live) = index.get(cpd_id.as_str()) {
                bind(&mut port.resource_handle, live.resource);
            }
        }
    }
}

/// Bind every entity whose descriptor id names a live resource.
pub fn reconcile(info: &mut InstantiatedVnfInfo, live: &LiveResources) {
    let index = live.by_name();

    for vnfc in &mut info.vnfc_resource_info {
        if let Some(found) = index.get(vnfc.vdu_id.as_str()) {
            bind_vnfc(vnfc, *found);
        }
    }
    for storage in &mut info.virtual_storage_resource_info {
        if let Some(found) = index.get(storage.virtual_storage_desc_id.as_str()) {
            bind(&mut storage.storage_resource, found.resource);
        }
    }

    let cpd_by_cp: HashMap<String, String> = info
        .vnfc_resource_info
        .iter()
        .flat_map(|vnfc| vnfc.vnfc_cp_info.iter())
        .map(|cp| (cp.id.clone(), cp.cpd_id.clone()))
        .collect();
    bind_links(&mut info.vnf_virtual_link_resource_info, &cpd_by_cp, &index);
    bind_links(&mut info.ext_managed_virtual_link_info, &cpd_by_cp, &index);
}

/// Rebind one compute unit and its storage against the resources of
/// `stack_id` only. Returns `false` when the unit does not exist.
pub fn reconcile_vnfc(
    info: &mut InstantiatedVnfInfo,
    vnfc_id: &str,
    stack_id: &str,
    resources: &[StackResource],
) -> bool {
    let scoped = LiveResources::new().with_stack(stack_id, resources.to_vec());
    let index = scoped.by_name();

    let Some(vnfc) = info
        .vnfc_resource_info
        .iter_mut()
        .find(|vnfc| vnfc.id == vnfc_id)
    else {
        return false;
    };
    if let Some(found) = index.get(vnfc.vdu_id.as_str()) {
        bind_vnfc(vnfc, *found);
    }
    let storage_ids = vnfc.storage_resource_ids.clone();

    for storage in storage_of(&mut info.virtual_storage_resource_info, &storage_ids) {
        if let Some(found) = index.get(storage.virtual_storage_desc_id.as_str()) {
            bind(&mut storage.storage_resource, found.resource);
        }
    }
    true
}

fn storage_of<'a>(
    storage: &'a mut [VirtualStorageResourceInfo],
    ids: &'a [String],
) -> impl Iterator<Item = &'a mut VirtualStorageResourceInfo> {
    storage
        .iter_mut()
        .filter(move |entry| ids.iter().any(|id| *id == entry.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VnfLinkPort, VnfcCpInfo};

    fn resource(name: &str, kind: &str, id: &str) -> StackResource {
        StackResource {
            resource_name: name.to_string(),
            resource_type: kind.to_string(),
            physical_resource_id: id.to_string(),
        }
    }

    fn topology() -> InstantiatedVnfInfo {
        InstantiatedVnfInfo {
            instance_id: "top".into(),
            vnfc_resource_info: vec![VnfcResourceInfo {
                id: "vnfc-1".into(),
                vdu_id: "VDU1".into(),
                storage_resource_ids: vec!["vs-1".into()],
                vnfc_cp_info: vec![VnfcCpInfo {
                    id: "cp-inst-1".into(),
                    cpd_id: "CP1".into(),
                    vnf_link_port_id: Some("port-1".into()),
                }],
                ..Default::default()
            }],
            virtual_storage_resource_info: vec![VirtualStorageResourceInfo {
                id: "vs-1".into(),
                virtual_storage_desc_id: "VirtualStorage".into(),
                ..Default::default()
            }],
            vnf_virtual_link_resource_info: vec![VirtualLinkResourceInfo {
                id: "vl-1".into(),
                vnf_virtual_link_desc_id: "internalVL1".into(),
                vnf_link_ports: vec![VnfLinkPort {
                    id: "port-1".into(),
                    cp_instance_id: Some("cp-inst-1".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ext_managed_virtual_link_info: vec![VirtualLinkResourceInfo {
                id: "ext-1".into(),
                vnf_virtual_link_desc_id: "extVL".into(),
                vnf_link_ports: vec![VnfLinkPort {
                    id: "ext-port".into(),
                    cp_instance_id: Some("cp-inst-1".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn live() -> LiveResources {
        LiveResources::new()
            .with_stack(
                "top",
                vec![
                    resource("internalVL1", "OS::Neutron::Net", "net-1"),
                    resource("CP1", "OS::Neutron::Port", "port-phys-1"),
                ],
            )
            .with_stack(
                "child",
                vec![
                    resource("VDU1", "OS::Nova::Server", "server-1"),
                    resource("VirtualStorage", "OS::Cinder::Volume", "volume-1"),
                ],
            )
    }

    #[test]
    fn binds_every_matching_entity() {
        let mut info = topology();
        reconcile(&mut info, &live());

        let vnfc = &info.vnfc_resource_info[0];
        assert_eq!(vnfc.compute_resource.resource_id, "server-1");
        assert_eq!(
            vnfc.compute_resource.vim_level_resource_type.as_deref(),
            Some("OS::Nova::Server")
        );
        assert_eq!(vnfc.stack_id(), Some("child"));
        assert_eq!(
            info.virtual_storage_resource_info[0].storage_resource.resource_id,
            "volume-1"
        );
        let link = &info.vnf_virtual_link_resource_info[0];
        assert_eq!(link.network_resource.resource_id, "net-1");
        assert_eq!(link.vnf_link_ports[0].resource_handle.resource_id, "port-phys-1");
        assert_eq!(
            info.ext_managed_virtual_link_info[0].vnf_link_ports[0]
                .resource_handle
                .resource_id,
            "port-phys-1"
        );
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let live = live();
        let mut once = topology();
        reconcile(&mut once, &live);
        let mut twice = once.clone();
        reconcile(&mut twice, &live);
        assert_eq!(once, twice);
    }

    #[test]
    fn unmatched_entities_are_untouched() {
        let mut info = topology();
        info.vnfc_resource_info[0].compute_resource =
            ResourceHandle::new("old", "OS::Nova::Server");
        let live = LiveResources::new().with_stack("top", vec![resource("Other", "x", "y")]);
        let before = info.clone();
        reconcile(&mut info, &live);
        assert_eq!(info, before);
    }

    #[test]
    fn resources_without_physical_id_are_ignored() {
        let mut info = topology();
        let live = LiveResources::new()
            .with_stack("top", vec![resource("VDU1", "OS::Nova::Server", "")]);
        reconcile(&mut info, &live);
        assert!(!info.vnfc_resource_info[0].compute_resource.is_bound());
    }

    #[test]
    fn scoped_reconcile_rebinds_one_unit() {
        let mut info = topology();
        reconcile(&mut info, &live());
        let fresh = vec![
            resource("VDU1", "OS::Nova::Server", "server-2"),
            resource("VirtualStorage", "OS::Cinder::Volume", "volume-2"),
        ];
        assert!(reconcile_vnfc(&mut info, "vnfc-1", "child", &fresh));
        assert_eq!(info.vnfc_resource_info[0].compute_resource.resource_id, "server-2");
        assert_eq!(
            info.virtual_storage_resource_info[0].storage_resource.resource_id,
            "volume-2"
        );
        assert!(!reconcile_vnfc(&mut info, "missing", "child", &fresh));
    }

    #[test]
    fn locate_prefers_physical_id() {
        let live = LiveResources::new()
            .with_stack("member-a", vec![resource("VDU1", "OS::Nova::Server", "server-a")])
            .with_stack("member-b", vec![resource("VDU1", "OS::Nova::Server", "server-b")]);
        let handle = ResourceHandle::new("server-b", "OS::Nova::Server");
        assert_eq!(live.locate("VDU1", &handle).unwrap().stack_id, "member-b");
        assert_eq!(
            live.locate("VDU1", &ResourceHandle::default()).unwrap().stack_id,
            "member-a"
        );
    }
}
