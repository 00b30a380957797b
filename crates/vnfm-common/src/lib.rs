//! ---
//! vnfm_section: "01-core-functionality"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Shared primitives for the lifecycle driver workspace."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
//! Shared configuration and tracing bootstrap for the VNF lifecycle driver.

pub mod config;
pub mod logging;

pub use config::{
    DriverConfig, ImagePolicy, ImageStoreConfig, LoadedDriverConfig, LoggingConfig,
    OrchestrationConfig, PollPolicy, WaitPolicies,
};
pub use logging::{init_tracing, resolve_filter, LogFormat};
