//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Scale coordinator: signal a policy and settle on its event history."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
//! A scaling signal is fire-and-forget on the orchestration side. Progress is
//! observed through the latest event of the policy resource: the id seen just
//! before signalling is the operation's token, and a different id afterwards
//! means the signal was processed. When no new event ever shows up, the
//! policy's `scaling_in_progress` metadata tells a stuck scale apart from a
//! signal swallowed by the cooldown window.

use std::iter;

use bytes::Bytes;
use serde_json::{Map, Value};
use vnfm_client::{RemoteError, ScaleEvent, StackStatus};
use vnfm_logging::{vnfm_info, vnfm_warn, LogContext};

use crate::driver::{encode, LifecycleDriver};
use crate::error::{DriverError, Result, WaitCause, WaitKind};
use crate::model::{ScalePolicy, VnfInstance};
use crate::poller::{Observed, Poller};
use crate::reconcile::{reconcile, LiveResources};

/// Metadata flag set on a policy resource while a scaling action runs.
pub const SCALING_IN_PROGRESS_KEY: &str = "scaling_in_progress";

const COOLDOWN_WARNING: &str =
    "When signal occurred within cool down window, no events generated from heat, so ignore it";

/// Latest event of a policy resource, as seen by one poll.
#[derive(Debug, Clone)]
struct ScaleObservation(Option<ScaleEvent>);

impl Observed for ScaleObservation {
    fn status_label(&self) -> String {
        match &self.0 {
            Some(event) => format!("{} ({})", event.resource_status, event.id),
            None => "no event".to_string(),
        }
    }
}

/// How one observation relates to the token taken before signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Settled,
    Failed,
}

fn progress(seen: &ScaleObservation, last_event_id: Option<&str>) -> Progress {
    let Some(event) = &seen.0 else {
        return Progress::Pending;
    };
    let status = event.resource_status;
    if Some(event.id.as_str()) == last_event_id {
        // The group was already at its bound; no new event will follow.
        if status == StackStatus::CREATE_COMPLETE || status == StackStatus::SIGNAL_COMPLETE {
            return Progress::Settled;
        }
        return Progress::Pending;
    }
    if status == StackStatus::SIGNAL_COMPLETE {
        Progress::Settled
    } else if status.is_failed() {
        Progress::Failed
    } else {
        Progress::Pending
    }
}

fn in_progress(metadata: &Map<String, Value>) -> bool {
    match metadata.get(SCALING_IN_PROGRESS_KEY) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn wait_failed(vnf_id: &str, policy: &ScalePolicy, reason: impl Into<String>) -> DriverError {
    DriverError::VnfScaleWaitFailed {
        vnf_instance_id: vnf_id.to_string(),
        stack_id: policy.stack_id.clone(),
        policy: policy.name.clone(),
        reason: reason.into(),
    }
}

impl LifecycleDriver {
    /// Signal the scaling policy and return the id of the latest event seen
    /// just before the signal, `None` when the resource had no events yet.
    pub async fn scale(&self, vnf: &VnfInstance, policy: &ScalePolicy) -> Result<Option<String>> {
        let resource = policy.resource_name();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf.id)
            .with_stack(&policy.stack_id)
            .with_resource(&resource)
            .with_operation("scale");
        let failed = |source: RemoteError| DriverError::VnfScaleFailed {
            stack_id: policy.stack_id.clone(),
            policy: policy.name.clone(),
            source,
        };
        let result: Result<Option<String>> = async {
            let token = self
                .stacks
                .latest_event(&policy.stack_id, &resource)
                .await
                .map_err(failed)?
                .map(|event| event.id);
            self.stacks
                .signal(&policy.stack_id, &resource)
                .await
                .map_err(failed)?;
            vnfm_info!(context = ctx, "signalled {} with token {:?}", resource, token);
            Ok(token)
        }
        .await;
        self.finish(&ctx, "vnf.scale", result)
    }

    /// Wait for the signal sent by [`scale`](Self::scale) to settle, then
    /// reconcile the topology and collect the scaling group's management
    /// addresses.
    ///
    /// Returns the addresses as compact JSON `{VDU: [ip, ...]}`, `{}` when
    /// the group exposes none.
    pub async fn scale_wait(
        &self,
        vnf: &mut VnfInstance,
        policy: &ScalePolicy,
        last_event_id: Option<&str>,
    ) -> Result<Bytes> {
        let vnf_id = vnf.id.clone();
        let resource = policy.resource_name();
        let ctx = LogContext::new()
            .with_vnf_instance(&vnf_id)
            .with_stack(&policy.stack_id)
            .with_resource(&resource)
            .with_operation("scale_wait");
        let result: Result<Bytes> = async {
            self.await_scale(&ctx, &vnf_id, policy, &resource, last_event_id)
                .await?;

            if let Some(mut info) = vnf.instantiated_vnf_info.clone() {
                let live = LiveResources::fetch(self.stacks.as_ref(), &info.instance_id)
                    .await
                    .map_err(DriverError::remote("list stack resources"))?;
                reconcile(&mut info, &live);
                vnf.instantiated_vnf_info = Some(info);
            }

            let group = policy.group_name();
            let ips = self
                .group_mgmt_ips(&policy.stack_id, iter::once(group.as_str()))
                .await
                .map_err(DriverError::remote("collect management addresses"))?;
            let found = !ips.is_empty();
            let encoded = encode(ips);
            vnf.mgmt_ip_address = found.then(|| encoded.clone());
            Ok(encoded)
        }
        .await;
        self.finish(&ctx, "vnf.scale_wait", result)
    }

    async fn await_scale(
        &self,
        ctx: &LogContext<'_>,
        vnf_id: &str,
        policy: &ScalePolicy,
        resource: &str,
        last_event_id: Option<&str>,
    ) -> Result<()> {
        let stacks = self.stacks.as_ref();
        let stack_id = policy.stack_id.as_str();
        let outcome = Poller::new(WaitKind::Scale, self.scale_policy())
            .with_metrics(self.metrics())
            .await_terminal(
                move || async move {
                    stacks
                        .latest_event(stack_id, resource)
                        .await
                        .map(ScaleObservation)
                },
                |seen: &ScaleObservation| progress(seen, last_event_id) != Progress::Pending,
                |seen: &ScaleObservation| progress(seen, last_event_id) == Progress::Settled,
            )
            .await;
        let failure = match outcome {
            Ok(_) => return Ok(()),
            Err(failure) => failure,
        };
        if !matches!(failure.cause, WaitCause::Exhausted) {
            vnfm_warn!(context = *ctx, "scale wait on {} failed: {}", resource, failure);
            return Err(wait_failed(vnf_id, policy, failure.to_string()));
        }

        let metadata = match stacks.resource_metadata(stack_id, resource).await {
            Ok(metadata) => metadata,
            Err(err) => {
                vnfm_warn!(context = *ctx, "reading metadata of {} failed: {}", resource, err);
                return Err(wait_failed(vnf_id, policy, err.to_string()));
            }
        };
        if in_progress(&metadata) {
            vnfm_warn!(
                context = *ctx,
                "{} is still scaling after {} seconds",
                resource,
                failure.budget.as_secs()
            );
            return Err(wait_failed(
                vnf_id,
                policy,
                format!(
                    "scaling is still in progress after {} seconds",
                    failure.budget.as_secs()
                ),
            ));
        }
        vnfm_warn!(context = *ctx, "{}", COOLDOWN_WARNING);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn after(token: Option<&str>, id: &str, status: StackStatus) -> Progress {
        let seen = ScaleObservation(Some(ScaleEvent {
            id: id.to_string(),
            resource_status: status,
            timestamp: Utc::now(),
        }));
        progress(&seen, token)
    }

    #[test]
    fn same_event_settles_only_at_a_bound() {
        let token = Some("ev-1");
        assert_eq!(after(token, "ev-1", StackStatus::CREATE_COMPLETE), Progress::Settled);
        assert_eq!(after(token, "ev-1", StackStatus::SIGNAL_COMPLETE), Progress::Settled);
        assert_eq!(after(token, "ev-1", StackStatus::UPDATE_COMPLETE), Progress::Pending);
    }

    #[test]
    fn new_event_settles_on_signal_complete() {
        let token = Some("ev-1");
        assert_eq!(after(token, "ev-2", StackStatus::SIGNAL_COMPLETE), Progress::Settled);
        assert_eq!(after(token, "ev-2", StackStatus::SIGNAL_IN_PROGRESS), Progress::Pending);
        assert_eq!(after(token, "ev-2", StackStatus::FAILED), Progress::Failed);
        assert_eq!(after(None, "ev-2", StackStatus::SIGNAL_COMPLETE), Progress::Settled);
        assert_eq!(progress(&ScaleObservation(None), token), Progress::Pending);
    }

    #[test]
    fn in_progress_flag_accepts_bool_and_string() {
        let flag = |value: Value| match json!({ SCALING_IN_PROGRESS_KEY: value }) {
            Value::Object(map) => in_progress(&map),
            _ => unreachable!(),
        };
        assert!(flag(json!(true)));
        assert!(flag(json!("True")));
        assert!(!flag(json!(false)));
        assert!(!flag(json!("no")));
        assert!(!in_progress(&Map::new()));
    }
}
