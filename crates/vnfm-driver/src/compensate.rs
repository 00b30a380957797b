//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Attempt, log and continue combinator for compensating actions."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::fmt::Display;
use std::future::Future;

use tracing::{error, info, warn};

use crate::metrics::DriverMetrics;

/// Result of a compensating action. Never an error: failures are logged and
/// counted, and the caller carries on with whatever failure it is handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensationOutcome {
    /// Attempts executed.
    pub attempts: u32,
    /// Whether one attempt succeeded.
    pub success: bool,
}

/// Runs `operation` up to `max_attempts` times until it succeeds.
///
/// Each failed attempt is logged at WARN; exhausting the attempts is logged
/// at ERROR and recorded under `action` in the compensation-failure counter.
pub async fn compensate<F, Fut, E>(
    action: &'static str,
    target: &str,
    max_attempts: u32,
    metrics: Option<&DriverMetrics>,
    mut operation: F,
) -> CompensationOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match operation(attempt).await {
            Ok(()) => {
                info!(action, target, attempt, "compensating action succeeded");
                return CompensationOutcome {
                    attempts: attempt,
                    success: true,
                };
            }
            Err(err) => {
                warn!(
                    action,
                    target,
                    attempt,
                    error = %err,
                    "compensating action attempt failed",
                );
            }
        }
    }

    error!(
        action,
        target,
        attempts = max_attempts,
        "exhausted compensating attempts; continuing"
    );
    if let Some(metrics) = metrics {
        metrics.record_compensation_failure(action);
    }
    CompensationOutcome {
        attempts: max_attempts,
        success: false,
    }
}
