//! Security audit events and sinks.
//!
//! The engine reports every security-relevant decision (pattern matched,
//! package filtered, admission refused) as an [`AuditEvent`] to an
//! [`AuditSink`]. Sinks are fire-and-forget: they return nothing and the
//! engine never waits on their success.
//!
//! [`AuditLogger`] is the bundled sink: a bounded in-memory ring of recent
//! events with JSON export.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default capacity of [`AuditLogger`].
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    /// Rejected code or a forced kill.
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Concurrency and host resource admission
    Admission,
    CodeScan,
    /// Package filtering and installation
    Dependency,
    Execution,
    /// Sandbox teardown and forced cleanup
    Cleanup,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::CodeScan => "code_scan",
            Self::Dependency => "dependency",
            Self::Execution => "execution",
            Self::Cleanup => "cleanup",
            Self::System => "system",
        }
    }
}

/// One security-relevant decision taken for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Random 128-bit hex id.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: AuditSeverity,
    pub category: AuditCategory,
    /// Event kind, e.g. `dangerous_package_filtered`.
    pub event_type: String,
    pub message: String,
    pub session_id: Option<String>,
    /// Offending package, pattern or path, when there is one.
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl AuditEvent {
    pub fn new(
        severity: AuditSeverity,
        category: AuditCategory,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            severity,
            category,
            event_type: event_type.into(),
            message: message.into(),
            session_id: None,
            resource: None,
            details: HashMap::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

fn event_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Destination for security events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event. Must not fail the caller.
    async fn log_security_event(&self, event: AuditEvent);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn log_security_event(&self, _event: AuditEvent) {}
}

/// Bounded in-memory audit store. Clones share the same ring.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    max_events: usize,
    min_severity: AuditSeverity,
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
}

impl AuditLogger {
    /// Keep at most `max_events`, evicting the oldest first.
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            min_severity: AuditSeverity::Info,
            events: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Drop events below `severity` instead of storing them.
    pub fn with_min_severity(mut self, severity: AuditSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn record(&self, event: AuditEvent) {
        if event.severity < self.min_severity {
            return;
        }
        tracing::debug!(
            target: "gg_sandbox::audit",
            event_type = %event.event_type,
            category = event.category.as_str(),
            session_id = event.session_id.as_deref().unwrap_or("-"),
            "Audit event recorded"
        );

        let mut events = self.events.lock();
        if events.len() == self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// All stored events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.select(|_| true)
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.select(|e| e.event_type == event_type)
    }

    pub fn events_for_session(&self, session_id: &str) -> Vec<AuditEvent> {
        self.select(|e| e.session_id.as_deref() == Some(session_id))
    }

    pub fn events_in(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.select(|e| e.category == category)
    }

    /// Events at `severity` or above.
    pub fn events_at_least(&self, severity: AuditSeverity) -> Vec<AuditEvent> {
        self.select(|e| e.severity >= severity)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Pretty-printed JSON array of all stored events.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        let events = self.events.lock();
        serde_json::to_string_pretty(&*events)
    }

    fn select(&self, keep: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| keep(e)).cloned().collect()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

#[async_trait]
impl AuditSink for AuditLogger {
    async fn log_security_event(&self, event: AuditEvent) {
        self.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(severity: AuditSeverity, category: AuditCategory, event_type: &str) -> AuditEvent {
        AuditEvent::new(severity, category, event_type, "test event")
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Critical > AuditSeverity::Error);
        assert!(AuditSeverity::Error > AuditSeverity::Warning);
        assert!(AuditSeverity::Warning > AuditSeverity::Info);
    }

    #[test]
    fn test_event_construction() {
        let event = AuditEvent::new(
            AuditSeverity::Warning,
            AuditCategory::Dependency,
            "dangerous_package_filtered",
            "package removed from install set",
        )
        .with_session("session-1")
        .with_resource("child_process")
        .with_detail("policy", "filter");

        assert_eq!(event.id.len(), 32);
        assert!(event.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(event.session_id.as_deref(), Some("session-1"));
        assert_eq!(event.resource.as_deref(), Some("child_process"));
        assert_eq!(event.details["policy"], "filter");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = event(AuditSeverity::Info, AuditCategory::System, "a");
        let b = event(AuditSeverity::Info, AuditCategory::System, "a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_min_severity_filter() {
        let logger = AuditLogger::default().with_min_severity(AuditSeverity::Warning);
        logger.record(event(AuditSeverity::Info, AuditCategory::System, "startup"));
        assert!(logger.is_empty());

        logger.record(event(
            AuditSeverity::Warning,
            AuditCategory::Admission,
            "concurrency_limit_hit",
        ));
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let logger = AuditLogger::new(3);
        for i in 0..5 {
            logger.record(event(AuditSeverity::Info, AuditCategory::System, &format!("e{}", i)));
        }
        let kinds: Vec<String> = logger.events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn test_sink_trait_stores_events() {
        let logger = AuditLogger::default();
        let sink: &dyn AuditSink = &logger;
        sink.log_security_event(
            event(AuditSeverity::Warning, AuditCategory::Dependency, "dangerous_package_filtered")
                .with_session("s1"),
        )
        .await;
        sink.log_security_event(
            event(AuditSeverity::Error, AuditCategory::Admission, "resource_limit_hit")
                .with_session("s2"),
        )
        .await;

        assert_eq!(logger.events_of_type("dangerous_package_filtered").len(), 1);
        assert_eq!(logger.events_in(AuditCategory::Admission).len(), 1);
        assert_eq!(logger.events_at_least(AuditSeverity::Error).len(), 1);
        assert_eq!(logger.events_for_session("s1").len(), 1);
    }

    #[test]
    fn test_export_json() {
        let logger = AuditLogger::default();
        logger.record(event(AuditSeverity::Critical, AuditCategory::CodeScan, "scan_rejected"));
        let json = logger.export_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["event_type"], "scan_rejected");
        assert_eq!(parsed[0]["severity"], "critical");
        assert_eq!(parsed[0]["category"], "code_scan");
        assert!(parsed[0].get("details").is_none());
    }
}
