//! ---
//! vnfm_section: "11-testing"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Tracing layer recording events for log assertions."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// One captured event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Rendered `message` field.
    pub message: String,
}

/// Layer that records every event; clones share the same buffer.
///
/// ```ignore
/// let logs = LogCapture::default();
/// let _guard = logs.install();
/// // ... run code under test ...
/// assert_eq!(logs.count(Level::WARN), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.0 = value.to_string();
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
        });
    }
}

impl LogCapture {
    /// Install as the thread-local default subscriber until the guard drops.
    ///
    /// Only events emitted on the current thread are captured, which covers
    /// `#[tokio::test]`'s current-thread runtime.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = Registry::default().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    /// Snapshot of every captured event.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Events at exactly `level`.
    pub fn count(&self, level: Level) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    /// Events at `level` whose message contains `needle`.
    pub fn count_matching(&self, level: Level, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level && event.message.contains(needle))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_level_and_message() {
        let logs = LogCapture::default();
        {
            let _guard = logs.install();
            tracing::warn!("cool down window");
            tracing::warn!(stack = "s1", "other warning");
            tracing::debug!("poll");
        }
        tracing::warn!("not captured");

        assert_eq!(logs.count(Level::WARN), 2);
        assert_eq!(logs.count_matching(Level::WARN, "cool down"), 1);
        assert_eq!(logs.count(Level::DEBUG), 1);
    }
}
