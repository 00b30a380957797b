//! ---
//! vnfm_section: "03-logging"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Structured lifecycle logging context and helpers."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging context shared by the lifecycle driver.
//!
//! Every event emitted through the `vnfm_*!` macros or
//! [`log_lifecycle_event`] carries the same four fields so operators can
//! filter a single VNF or stack out of an interleaved log stream.

#[macro_use]
pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// VNF instance the event concerns.
    pub vnf_instance: Option<&'a str>,
    /// Orchestration stack id.
    pub stack: Option<&'a str>,
    /// Stack resource or image name.
    pub resource: Option<&'a str>,
    /// Lifecycle operation (instantiate, heal, scale, ...).
    pub operation: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a VNF instance id.
    pub fn with_vnf_instance(mut self, vnf_instance: &'a str) -> Self {
        self.vnf_instance = Some(vnf_instance);
        self
    }

    /// Attach a stack id.
    pub fn with_stack(mut self, stack: &'a str) -> Self {
        self.stack = Some(stack);
        self
    }

    /// Attach a resource name.
    pub fn with_resource(mut self, resource: &'a str) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Attach the lifecycle operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// Outcome of a finished lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl LifecycleOutcome {
    /// Stable lowercase label, also used as a metrics label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit the closing event of a lifecycle operation: INFO on success, ERROR on fault.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    match outcome {
        LifecycleOutcome::Success => tracing::info!(
            event = %event,
            outcome = outcome.as_str(),
            vnf_instance = ctx.vnf_instance.unwrap_or(""),
            stack = ctx.stack.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
        LifecycleOutcome::Fault => tracing::error!(
            event = %event,
            outcome = outcome.as_str(),
            vnf_instance = ctx.vnf_instance.unwrap_or(""),
            stack = ctx.stack.unwrap_or(""),
            resource = ctx.resource.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::Registry;

    use super::*;

    #[derive(Default, Clone)]
    struct Captured(Arc<Mutex<Vec<(Level, Vec<(String, String)>)>>>);

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = Vec::new();
            event.record(&mut FieldVisitor(&mut fields));
            self.0.lock().push((*event.metadata().level(), fields));
        }
    }

    fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn macros_attach_context_fields() {
        let captured = Captured::default();
        let subscriber = Registry::default().with(captured.clone());
        tracing::subscriber::with_default(subscriber, || {
            let ctx = LogContext::new()
                .with_vnf_instance("vnf-1")
                .with_stack("stack-1")
                .with_operation("heal");
            vnfm_info!(context = ctx.clone(), "heal started");
            vnfm_warn!(context = ctx, "resource {} stuck", "VDU1");
            vnfm_debug!("plain debug");
        });

        let events = captured.0.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, Level::INFO);
        assert_eq!(field(&events[0].1, "vnf_instance"), Some("vnf-1"));
        assert_eq!(field(&events[1].1, "message"), Some("resource VDU1 stuck"));
        assert_eq!(events[1].0, Level::WARN);
        assert_eq!(field(&events[2].1, "stack"), Some(""));
    }

    #[test]
    fn lifecycle_event_level_follows_outcome() {
        let captured = Captured::default();
        let subscriber = Registry::default().with(captured.clone());
        tracing::subscriber::with_default(subscriber, || {
            let ctx = LogContext::new().with_vnf_instance("vnf-2");
            log_lifecycle_event(Some(&ctx), "vnf.instantiate", "done", LifecycleOutcome::Success);
            log_lifecycle_event(None, "vnf.instantiate", "failed", LifecycleOutcome::Fault);
        });

        let events = captured.0.lock();
        assert_eq!(events[0].0, Level::INFO);
        assert_eq!(field(&events[0].1, "outcome"), Some("success"));
        assert_eq!(events[1].0, Level::ERROR);
        assert_eq!(field(&events[1].1, "vnf_instance"), Some(""));
    }
}
