//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Registry of LCM user-data hooks selected by request parameters."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::path::{Component, Path};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{DriverError, Result};
use crate::template::{InstantiateRequest, NativeTemplate};

/// `additionalParams` key naming the hook module.
pub const USER_DATA_PATH_KEY: &str = "lcm-operation-user-data";
/// `additionalParams` key naming the hook class inside the module.
pub const USER_DATA_CLASS_KEY: &str = "lcm-operation-user-data-class";

/// Hook computing stack parameters for an instantiation.
pub trait UserData: Send + Sync {
    /// Parameters for the stack built from `base`. Must be a JSON object.
    fn instantiate(
        &self,
        base: &NativeTemplate,
        request: &InstantiateRequest,
    ) -> std::result::Result<Value, String>;
}

impl<F> UserData for F
where
    F: Fn(&NativeTemplate, &InstantiateRequest) -> std::result::Result<Value, String> + Send + Sync,
{
    fn instantiate(
        &self,
        base: &NativeTemplate,
        request: &InstantiateRequest,
    ) -> std::result::Result<Value, String> {
        self(base, request)
    }
}

/// Hook reference read from `additionalParams`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserDataRef {
    /// Module path, relative to the VNF package.
    pub path: String,
    /// Class name.
    pub class: String,
}

impl UserDataRef {
    /// Read and validate the hook keys. `None` when neither key is given.
    pub fn from_params(params: &Map<String, Value>) -> Result<Option<Self>> {
        let path = params.get(USER_DATA_PATH_KEY);
        let class = params.get(USER_DATA_CLASS_KEY);
        if path.is_none() && class.is_none() {
            return Ok(None);
        }
        let path = required(path, USER_DATA_PATH_KEY)?;
        let class = required(class, USER_DATA_CLASS_KEY)?;

        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(DriverError::user_data(format!(
                "{USER_DATA_PATH_KEY} '{path}' must be a relative path inside the package"
            )));
        }
        Ok(Some(Self {
            path: path.to_string(),
            class: class.to_string(),
        }))
    }
}

fn required<'a>(value: Option<&'a Value>, key: &str) -> Result<&'a str> {
    match value.and_then(Value::as_str).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DriverError::user_data(format!(
            "'{key}' must be a non-empty string in additionalParams"
        ))),
    }
}

/// Hooks available to the driver, keyed by module path and class name.
#[derive(Clone, Default)]
pub struct UserDataRegistry {
    hooks: IndexMap<UserDataRef, Arc<dyn UserData>>,
}

impl UserDataRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `path` and `class`.
    pub fn register(
        mut self,
        path: impl Into<String>,
        class: impl Into<String>,
        hook: impl UserData + 'static,
    ) -> Self {
        self.hooks.insert(
            UserDataRef {
                path: path.into(),
                class: class.into(),
            },
            Arc::new(hook),
        );
        self
    }

    /// Resolve the hook selected by the request, if any.
    pub fn resolve(
        &self,
        params: &Map<String, Value>,
    ) -> Result<Option<(UserDataRef, Arc<dyn UserData>)>> {
        let Some(reference) = UserDataRef::from_params(params)? else {
            return Ok(None);
        };
        match self.hooks.get(&reference) {
            Some(hook) => Ok(Some((reference, hook.clone()))),
            None => Err(DriverError::user_data(format!(
                "no user data class '{}' registered for '{}'",
                reference.class, reference.path
            ))),
        }
    }

    /// Render the stack template through the selected hook.
    ///
    /// Returns `None` when the request selects no hook.
    pub fn render(&self, request: &InstantiateRequest) -> Result<Option<NativeTemplate>> {
        let Some((reference, hook)) = self.resolve(&request.additional_params)? else {
            return Ok(None);
        };
        let base = request.base_template.as_ref().ok_or_else(|| {
            DriverError::user_data(format!(
                "user data '{}' requires a base template",
                reference.path
            ))
        })?;
        let parameters = match hook.instantiate(base, request) {
            Ok(Value::Object(parameters)) => parameters,
            Ok(other) => {
                return Err(DriverError::user_data(format!(
                    "user data class '{}' returned {other} instead of a parameter object",
                    reference.class
                )))
            }
            Err(reason) => {
                return Err(DriverError::user_data(format!(
                    "user data class '{}' failed: {reason}",
                    reference.class
                )))
            }
        };

        let mut rendered = base.clone();
        rendered.parameters = parameters.into_iter().collect();
        Ok(Some(rendered))
    }
}

impl std::fmt::Debug for UserDataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}
