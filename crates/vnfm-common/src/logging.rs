//! ---
//! vnfm_section: "01-core-functionality"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Tracing bootstrap shared by driver hosts."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "VNFM_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

// Connection chatter of the HTTP stack buries lifecycle events at debug.
const QUIET_TRANSPORT: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

static WRITER_GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Output format for the stdout layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// One JSON object per event, lifecycle fields at the top level.
    #[default]
    StructuredJson,
    /// Human readable lines.
    Pretty,
}

/// Resolve the filter directive: `VNFM_LOG`, then `RUST_LOG`, then `info`.
///
/// An explicit directive is taken as given; the `info` fallback also
/// quiets the HTTP transport crates.
pub fn resolve_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to {DEFAULT_DIRECTIVE}");
            default_filter()
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter()),
    }
}

fn default_filter() -> EnvFilter {
    QUIET_TRANSPORT
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::new(DEFAULT_DIRECTIVE), EnvFilter::add_directive)
}

/// Install the process-wide subscriber for a driver host: stdout in the
/// configured format plus a daily rolling JSON file `<prefix>.log` under
/// `config.directory`, the prefix defaulting to `service_name`.
///
/// JSON output flattens event fields, so `vnf_instance`, `stack`,
/// `resource` and `operation` are top-level keys. Returns `false` when a
/// global subscriber was already installed; that one is left in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<bool> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("creating log directory {}", config.directory.display()))?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    let installed = tracing_subscriber::registry()
        .with(resolve_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        return Ok(false);
    }
    let _ = WRITER_GUARDS.set([file_guard, stdout_guard]);
    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Pretty,
            file_prefix: Some("test".into()),
        };
        assert!(init_tracing("vnfm-driver", &config).unwrap());
        assert!(config.directory.is_dir());
        assert!(!init_tracing("vnfm-driver", &config).unwrap());
    }

    #[test]
    fn log_format_uses_kebab_case() {
        let format: LogFormat = serde_json::from_str("\"structured-json\"").unwrap();
        assert_eq!(format, LogFormat::StructuredJson);
    }
}
