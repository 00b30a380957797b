//! ---
//! vnfm_section: "01-core-functionality"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Driver configuration and per-operation wait budgets."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_orchestration_endpoint() -> Url {
    Url::parse("http://127.0.0.1:8004/v1/").expect("valid default orchestration endpoint")
}

fn default_image_store_endpoint() -> Url {
    Url::parse("http://127.0.0.1:9292/v2/").expect("valid default image store endpoint")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_retries() -> u32 {
    1
}

fn default_stack_policy() -> PollPolicy {
    PollPolicy::new(60, Duration::from_secs(10))
}

fn default_image_policy() -> PollPolicy {
    PollPolicy::new(10, Duration::from_secs(1))
}

fn default_cleanup_attempts() -> u32 {
    2
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the lifecycle driver.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub image_store: ImageStoreConfig,
    #[serde(default)]
    pub waits: WaitPolicies,
    #[serde(default)]
    pub images: ImagePolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`DriverConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedDriverConfig {
    pub config: DriverConfig,
    pub source: PathBuf,
}

impl DriverConfig {
    pub const ENV_CONFIG_PATH: &str = "VNFM_CONFIG";

    /// Load configuration from disk, respecting the `VNFM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedDriverConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedDriverConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedDriverConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<DriverConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("orchestration", &self.orchestration.endpoint)?;
        validate_endpoint("image_store", &self.image_store.endpoint)?;
        for (kind, policy) in self.waits.iter() {
            policy
                .validate()
                .with_context(|| format!("invalid wait policy for {kind}"))?;
        }
        self.images
            .activation
            .validate()
            .context("invalid image activation policy")?;
        if self.images.cleanup_attempts == 0 {
            return Err(anyhow!("images.cleanup_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl std::str::FromStr for DriverConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: DriverConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_endpoint(section: &str, endpoint: &Url) -> Result<()> {
    match endpoint.scheme() {
        "http" | "https" if endpoint.has_host() => Ok(()),
        _ => Err(anyhow!(
            "{section}.endpoint must be an absolute http(s) url, got {endpoint}"
        )),
    }
}

/// Bounded polling budget: `retries` fetches separated by a fixed `interval`.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollPolicy {
    pub retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(retries: u32, interval: Duration) -> Self {
        Self { retries, interval }
    }

    /// Nominal wait bound, `retries × interval`.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.retries)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(anyhow!("retries must be at least 1"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_orchestration_endpoint")]
    pub endpoint: Url,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_orchestration_endpoint(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageStoreConfig {
    #[serde(default = "default_image_store_endpoint")]
    pub endpoint: Url,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Extra attempts for one-shot calls that fail at the transport level.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

impl Default for ImageStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_image_store_endpoint(),
            request_timeout: default_request_timeout(),
            connect_retries: default_connect_retries(),
        }
    }
}

/// Wait budgets for every stack-level lifecycle operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitPolicies {
    #[serde(default = "default_stack_policy")]
    pub create: PollPolicy,
    #[serde(default = "default_stack_policy")]
    pub update: PollPolicy,
    #[serde(default = "default_stack_policy")]
    pub delete: PollPolicy,
    #[serde(default = "default_stack_policy")]
    pub heal: PollPolicy,
    #[serde(default = "default_stack_policy")]
    pub scale: PollPolicy,
}

impl WaitPolicies {
    /// Apply one policy to every operation, mostly useful in tests.
    pub fn uniform(policy: PollPolicy) -> Self {
        Self {
            create: policy,
            update: policy,
            delete: policy,
            heal: policy,
            scale: policy,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &PollPolicy)> {
        [
            ("create", &self.create),
            ("update", &self.update),
            ("delete", &self.delete),
            ("heal", &self.heal),
            ("scale", &self.scale),
        ]
        .into_iter()
    }
}

impl Default for WaitPolicies {
    fn default() -> Self {
        Self::uniform(default_stack_policy())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImagePolicy {
    #[serde(default = "default_image_policy")]
    pub activation: PollPolicy,
    /// Delete attempts made when cleaning up a provisioned image.
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            activation: default_image_policy(),
            cleanup_attempts: default_cleanup_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
