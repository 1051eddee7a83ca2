//! Telemetry module for GG-SANDBOX.
//!
//! Provides structured logging, security event logging, session spans and
//! metrics. All output goes through `tracing` and the `metrics` facade; the
//! host process owns exporters.

mod logging;
pub mod metrics;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{code_digest, SessionSpan, SpanExt};
