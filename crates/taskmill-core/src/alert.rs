//! Fire-and-forget reporting to an operator-facing alert sink.
//!
//! The scheduler never depends on how alerts are stored; it only calls
//! [`AlertSink::record`]. [`TracingSink`] is the production sink,
//! [`MemorySink`] keeps everything in memory for inspection.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of an alert. `Status` is a raw progress line, not a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Status,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertLevel::Status => "status",
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

pub trait AlertSink: Send + Sync {
    /// Record one message. Must not block or fail.
    fn record(&self, level: AlertLevel, message: &str);

    fn status(&self, message: &str) {
        self.record(AlertLevel::Status, message);
    }

    fn info(&self, message: &str) {
        self.record(AlertLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.record(AlertLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.record(AlertLevel::Error, message);
    }
}

/// Forwards alerts to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn record(&self, level: AlertLevel, message: &str) {
        match level {
            AlertLevel::Status => info!(status = true, "{message}"),
            AlertLevel::Info => info!(alert = true, "{message}"),
            AlertLevel::Warning => warn!(alert = true, "{message}"),
            AlertLevel::Error => error!(alert = true, "{message}"),
        }
    }
}

/// A recorded alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

/// Keeps every alert in arrival order, and forwards it to `tracing` as well.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn alerts(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(alerts) => alerts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, level: AlertLevel) -> usize {
        self.alerts().iter().filter(|a| a.level == level).count()
    }

    /// Messages recorded at `level`.
    pub fn messages(&self, level: AlertLevel) -> Vec<String> {
        self.alerts()
            .into_iter()
            .filter(|a| a.level == level)
            .map(|a| a.message)
            .collect()
    }

    pub fn clear(&self) {
        match self.alerts.lock() {
            Ok(mut alerts) => alerts.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl AlertSink for MemorySink {
    fn record(&self, level: AlertLevel, message: &str) {
        TracingSink.record(level, message);
        let alert = Alert {
            level,
            message: message.to_string(),
        };
        match self.alerts.lock() {
            Ok(mut alerts) => alerts.push(alert),
            Err(poisoned) => poisoned.into_inner().push(alert),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_counts_by_level() {
        let sink = MemorySink::new();
        sink.error("boom");
        sink.warning("careful");
        sink.error("boom again");
        sink.status("tick");

        assert_eq!(sink.count(AlertLevel::Error), 2);
        assert_eq!(sink.count(AlertLevel::Warning), 1);
        assert_eq!(sink.count(AlertLevel::Info), 0);
        assert_eq!(sink.messages(AlertLevel::Status), vec!["tick".to_string()]);

        sink.clear();
        assert!(sink.alerts().is_empty());
    }

    #[test]
    fn works_through_trait_object() {
        let sink = MemorySink::new();
        let dyn_sink: &dyn AlertSink = &sink;
        dyn_sink.info("hello");
        assert_eq!(sink.alerts()[0].level, AlertLevel::Info);
    }
}
