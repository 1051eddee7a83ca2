//! Metrics recorded through the `metrics` facade.
//!
//! The library installs no recorder; without one these calls are no-ops.

use ::metrics::{counter, gauge, histogram};

/// Admission attempt outcome: `admitted`, `at_capacity`, `resources`, ...
pub fn record_admission(outcome: &'static str) {
    counter!("gg_sandbox_admissions_total", "outcome" => outcome).increment(1);
}

/// Terminal session outcome: `completed`, `failed`, `rejected`, ...
pub fn record_session_outcome(outcome: &'static str) {
    counter!("gg_sandbox_sessions_total", "outcome" => outcome).increment(1);
}

pub fn record_execution_duration(duration_ms: u64) {
    histogram!("gg_sandbox_execution_duration_ms").record(duration_ms as f64);
}

pub fn record_active_sessions(active: usize) {
    gauge!("gg_sandbox_active_sessions").set(active as f64);
}

pub fn record_cleanup_failure() {
    counter!("gg_sandbox_cleanup_failures_total").increment(1);
}

pub fn record_packages_filtered(count: usize) {
    counter!("gg_sandbox_packages_filtered_total").increment(count as u64);
}
