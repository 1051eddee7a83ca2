//! GG-SANDBOX
//!
//! A sandboxed code-execution engine for untrusted, machine-generated
//! snippets. Code is screened by a static risk scanner, admitted through a
//! concurrency gate and a host resource check, given a private working
//! directory with a restricted dependency manifest, run as one child process
//! under time, memory and output caps, and torn down afterwards.
//!
//! # Layers
//!
//! - **Scanner**: pattern table plus structural heuristics, pure and
//!   deterministic
//! - **Gate**: one mutex-guarded registry bounds concurrent sessions
//! - **Sandbox**: per-session directory, removed on every exit path
//! - **Supervisor**: deadline, heap flag, incremental stdout cap, group kill
//!
//! This is an application-level sandbox. It adds no kernel isolation
//! (namespaces, cgroups, VMs) and is a defense-in-depth layer, not a
//! security boundary against a determined attacker.

pub mod cli;
pub mod config;
pub mod engine;
pub mod exec;
pub mod health;
pub mod registry;
pub mod sandbox;
pub mod security;
pub mod shutdown;
pub mod telemetry;

pub use config::{ConfigSource, EngineLimits, SharedLimits};
pub use engine::{
    AdmissionRefusal, CleanupReport, EngineConfig, EngineError, ErrorCategory, ExecutionEngine,
    ShutdownReport,
};
pub use exec::{ExecutionFailure, ExecutionResult, ResourceLimits, ScriptRuntime};
pub use health::{LimitReport, ResourceMonitor, ResourceThresholds, SystemHealth};
pub use registry::{SessionInfo, SessionState};
pub use security::{AuditSink, Issue, IssueKind, RiskLevel, ScanResult, Severity};
