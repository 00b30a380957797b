//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Native template rendering seam and instantiate request."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vnfm_client::StackRequest;

use crate::model::{GrantInfo, SoftwareImage};

/// Template in the orchestration service's own format, with its nested files
/// and flat parameter mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeTemplate {
    /// Top-level template document.
    pub template: Value,
    /// Nested templates referenced by the top-level one.
    #[serde(default)]
    pub files: IndexMap<String, String>,
    /// Stack parameters.
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
}

impl NativeTemplate {
    /// Creation request for a stack named `stack_name`.
    pub fn into_request(self, stack_name: &str) -> StackRequest {
        StackRequest {
            stack_name: stack_name.to_string(),
            template: self.template,
            files: self.files,
            parameters: self.parameters,
        }
    }
}

/// Everything needed to instantiate one VNF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstantiateRequest {
    /// Name given to the top-level stack.
    pub stack_name: String,
    /// Resolved descriptor, input of the [`TemplateTranslator`].
    pub descriptor: Value,
    /// Base template shipped with the VNF package; required by user-data hooks.
    pub base_template: Option<NativeTemplate>,
    /// Operator supplied parameters, including the user-data hook keys.
    pub additional_params: Map<String, Value>,
    /// Images to provision before the stack is created.
    pub software_images: Vec<SoftwareImage>,
    /// Pre-allocated resources.
    pub grant: GrantInfo,
}

/// Renders a descriptor into a native template.
pub trait TemplateTranslator: Send + Sync {
    /// Produce the template for `request`, or a human readable reason.
    fn translate(&self, request: &InstantiateRequest) -> Result<NativeTemplate, String>;
}

/// Uses the request's base template as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

impl TemplateTranslator for PassthroughTranslator {
    fn translate(&self, request: &InstantiateRequest) -> Result<NativeTemplate, String> {
        request
            .base_template
            .clone()
            .ok_or_else(|| format!("no template supplied for stack {}", request.stack_name))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn passthrough_requires_a_template() {
        let mut request = InstantiateRequest {
            stack_name: "vnf-stack".into(),
            ..Default::default()
        };
        assert!(PassthroughTranslator
            .translate(&request)
            .unwrap_err()
            .contains("vnf-stack"));

        request.base_template = Some(NativeTemplate {
            template: json!({"heat_template_version": "2013-05-23"}),
            ..Default::default()
        });
        let rendered = PassthroughTranslator.translate(&request).unwrap();
        let stack = rendered.into_request("vnf-stack");
        assert_eq!(stack.stack_name, "vnf-stack");
        assert_eq!(stack.template["heat_template_version"], "2013-05-23");
    }
}
