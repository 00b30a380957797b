//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Bounded polling of asynchronous remote operations."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::future::Future;

use tokio::time::sleep;
use tracing::debug;
use vnfm_client::{Image, RemoteError, Stack};
use vnfm_common::PollPolicy;

use crate::error::{WaitCause, WaitFailed, WaitKind};
use crate::metrics::DriverMetrics;

/// Anything whose status can be rendered into a log line or error.
pub trait Observed {
    /// Human readable status.
    fn status_label(&self) -> String;
}

impl Observed for Stack {
    fn status_label(&self) -> String {
        self.stack_status.to_string()
    }
}

impl Observed for Image {
    fn status_label(&self) -> String {
        self.status.to_string()
    }
}

/// Fetches a status up to `policy.retries` times, sleeping `policy.interval`
/// between fetches, until a terminal status shows up.
///
/// The poller never logs above DEBUG; callers decide how a failed wait is
/// reported.
#[derive(Debug, Clone, Copy)]
pub struct Poller<'a> {
    kind: WaitKind,
    policy: PollPolicy,
    metrics: Option<&'a DriverMetrics>,
}

impl<'a> Poller<'a> {
    /// Poller for one wait of `kind`.
    pub fn new(kind: WaitKind, policy: PollPolicy) -> Self {
        Self {
            kind,
            policy,
            metrics: None,
        }
    }

    /// Record attempts and outcomes.
    pub fn with_metrics(mut self, metrics: Option<&'a DriverMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run the wait.
    ///
    /// Returns the first terminal status for which `is_success` holds. A
    /// terminal non-success status, an exhausted budget or a failing fetch
    /// end the wait with [`WaitFailed`]; fetch errors are never retried.
    pub async fn await_terminal<S, F, Fut, T, P>(
        &self,
        mut fetch: F,
        is_terminal: T,
        is_success: P,
    ) -> Result<S, WaitFailed>
    where
        S: Observed,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, RemoteError>>,
        T: Fn(&S) -> bool,
        P: Fn(&S) -> bool,
    {
        let retries = self.policy.retries.max(1);
        for attempt in 1..=retries {
            if let Some(metrics) = self.metrics {
                metrics.record_poll_attempt(self.kind);
            }
            let observed = match fetch().await {
                Ok(observed) => observed,
                Err(err) => return Err(self.fail(attempt, WaitCause::Remote(err))),
            };
            let status = observed.status_label();
            debug!(kind = %self.kind, attempt, retries, %status, "polled status");
            if is_terminal(&observed) {
                if is_success(&observed) {
                    if let Some(metrics) = self.metrics {
                        metrics.record_wait_outcome(self.kind, "success");
                    }
                    return Ok(observed);
                }
                return Err(self.fail(attempt, WaitCause::Failed(status)));
            }
            if attempt < retries {
                sleep(self.policy.interval).await;
            }
        }
        Err(self.fail(retries, WaitCause::Exhausted))
    }

    fn fail(&self, attempts: u32, cause: WaitCause) -> WaitFailed {
        if let Some(metrics) = self.metrics {
            let outcome = match cause {
                WaitCause::Exhausted => "exhausted",
                WaitCause::Failed(_) => "failed",
                WaitCause::Remote(_) => "error",
            };
            metrics.record_wait_outcome(self.kind, outcome);
        }
        WaitFailed {
            kind: self.kind,
            attempts,
            budget: self.policy.budget(),
            cause,
        }
    }
}
