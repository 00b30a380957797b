//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Prometheus metrics published by the lifecycle driver."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::error::WaitKind;

/// Registry shared between the driver and whatever exposes the metrics.
pub type SharedRegistry = Arc<Registry>;

/// Metrics published by the lifecycle driver.
#[derive(Clone)]
pub struct DriverMetrics {
    registry: SharedRegistry,
    wait_outcomes_total: IntCounterVec,
    poll_attempts_total: IntCounterVec,
    image_rollbacks_total: IntCounter,
    images_provisioned_total: IntCounter,
    compensation_failures_total: IntCounterVec,
}

impl DriverMetrics {
    /// Register the driver metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self, prometheus::Error> {
        let wait_outcomes_total = IntCounterVec::new(
            Opts::new(
                "vnfm_wait_outcomes_total",
                "Bounded waits by operation kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(wait_outcomes_total.clone()))?;

        let poll_attempts_total = IntCounterVec::new(
            Opts::new(
                "vnfm_poll_attempts_total",
                "Status fetches issued by bounded waits",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(poll_attempts_total.clone()))?;

        let image_rollbacks_total = IntCounter::new(
            "vnfm_image_rollbacks_total",
            "Image batches rolled back after a provisioning failure",
        )?;
        registry.register(Box::new(image_rollbacks_total.clone()))?;

        let images_provisioned_total = IntCounter::new(
            "vnfm_images_provisioned_total",
            "Images created, verified and recorded",
        )?;
        registry.register(Box::new(images_provisioned_total.clone()))?;

        let compensation_failures_total = IntCounterVec::new(
            Opts::new(
                "vnfm_compensation_failures_total",
                "Compensating actions that failed on every attempt",
            ),
            &["action"],
        )?;
        registry.register(Box::new(compensation_failures_total.clone()))?;

        Ok(Self {
            registry,
            wait_outcomes_total,
            poll_attempts_total,
            image_rollbacks_total,
            images_provisioned_total,
            compensation_failures_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub(crate) fn record_wait_outcome(&self, kind: WaitKind, outcome: &str) {
        self.wait_outcomes_total
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
    }

    pub(crate) fn record_poll_attempt(&self, kind: WaitKind) {
        self.poll_attempts_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub(crate) fn record_image_rollback(&self) {
        self.image_rollbacks_total.inc();
    }

    pub(crate) fn record_image_provisioned(&self) {
        self.images_provisioned_total.inc();
    }

    pub(crate) fn record_compensation_failure(&self, action: &str) {
        self.compensation_failures_total
            .with_label_values(&[action])
            .inc();
    }
}

impl std::fmt::Debug for DriverMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_counts() {
        let registry = Arc::new(Registry::new());
        let metrics = DriverMetrics::new(registry.clone()).unwrap();
        metrics.record_wait_outcome(WaitKind::Heal, "success");
        metrics.record_poll_attempt(WaitKind::Heal);
        metrics.record_poll_attempt(WaitKind::Heal);
        metrics.record_image_rollback();
        metrics.record_compensation_failure("delete_image");

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|family| family.get_name()).collect();
        assert!(names.contains(&"vnfm_wait_outcomes_total"));
        assert!(names.contains(&"vnfm_compensation_failures_total"));
        assert_eq!(
            metrics
                .poll_attempts_total
                .with_label_values(&["heal"])
                .get(),
            2
        );
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = Arc::new(Registry::new());
        DriverMetrics::new(registry.clone()).unwrap();
        assert!(DriverMetrics::new(registry).is_err());
    }
}
