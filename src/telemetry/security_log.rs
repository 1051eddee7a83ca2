//! Security event logging for GG-SANDBOX.
//!
//! Every security-relevant decision the engine makes is written as one
//! structured `SECURITY` line, at a level that follows the event severity,
//! so log pipelines can alert on them without parsing audit exports.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::security::{AuditCategory, AuditSeverity};

/// Security event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// High or critical pattern matched by the scanner.
    DangerousPatternDetected,
    /// Code refused because of a critical issue.
    ScanRejected,
    /// Deny-listed package dropped from the install set.
    DangerousPackageFiltered,
    /// Deny-listed package caused a strict-mode rejection.
    DangerousPackageRejected,
    /// Malformed package specifier dropped or rejected.
    InvalidPackageName,
    /// Admission refused at the concurrency bound.
    ConcurrencyLimitHit,
    /// Admission refused by the host resource check.
    ResourceLimitHit,
    /// Child killed at the wall-clock deadline.
    ExecutionTimeout,
    /// Child killed for exceeding the output cap.
    OutputLimitExceeded,
    /// Session torn down through the force-cleanup path.
    SessionForceCleaned,
    /// Caller-supplied session id failed validation.
    InvalidSessionId,
}

impl SecurityEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::DangerousPatternDetected => SecuritySeverity::Warning,
            Self::ScanRejected => SecuritySeverity::Critical,
            Self::DangerousPackageFiltered => SecuritySeverity::Warning,
            Self::DangerousPackageRejected => SecuritySeverity::Error,
            Self::InvalidPackageName => SecuritySeverity::Warning,
            Self::ConcurrencyLimitHit => SecuritySeverity::Info,
            Self::ResourceLimitHit => SecuritySeverity::Warning,
            Self::ExecutionTimeout => SecuritySeverity::Warning,
            Self::OutputLimitExceeded => SecuritySeverity::Warning,
            Self::SessionForceCleaned => SecuritySeverity::Info,
            Self::InvalidSessionId => SecuritySeverity::Warning,
        }
    }

    /// Stable event name used in logs and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DangerousPatternDetected => "dangerous_pattern_detected",
            Self::ScanRejected => "scan_rejected",
            Self::DangerousPackageFiltered => "dangerous_package_filtered",
            Self::DangerousPackageRejected => "dangerous_package_rejected",
            Self::InvalidPackageName => "invalid_package_name",
            Self::ConcurrencyLimitHit => "concurrency_limit_hit",
            Self::ResourceLimitHit => "resource_limit_hit",
            Self::ExecutionTimeout => "execution_timeout",
            Self::OutputLimitExceeded => "output_limit_exceeded",
            Self::SessionForceCleaned => "session_force_cleaned",
            Self::InvalidSessionId => "invalid_session_id",
        }
    }

    /// Audit category the event is filed under.
    pub fn category(&self) -> AuditCategory {
        match self {
            Self::DangerousPatternDetected | Self::ScanRejected => AuditCategory::CodeScan,
            Self::DangerousPackageFiltered
            | Self::DangerousPackageRejected
            | Self::InvalidPackageName => AuditCategory::Dependency,
            Self::ConcurrencyLimitHit | Self::ResourceLimitHit | Self::InvalidSessionId => {
                AuditCategory::Admission
            }
            Self::ExecutionTimeout | Self::OutputLimitExceeded => AuditCategory::Execution,
            Self::SessionForceCleaned => AuditCategory::Cleanup,
        }
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Matching audit severity.
    pub fn to_audit(self) -> AuditSeverity {
        match self {
            Self::Debug | Self::Info => AuditSeverity::Info,
            Self::Warning => AuditSeverity::Warning,
            Self::Error => AuditSeverity::Error,
            Self::Critical => AuditSeverity::Critical,
        }
    }
}

/// Render the structured line for an event.
pub fn format_security_line(
    timestamp: u64,
    event: SecurityEvent,
    message: &str,
    details: &[(&str, &str)],
) -> String {
    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    if details_str.is_empty() {
        format!(
            "[{}] SECURITY {} {}: {}",
            timestamp,
            event.severity().as_str(),
            event.as_str(),
            message
        )
    } else {
        format!(
            "[{}] SECURITY {} {}: {} | {}",
            timestamp,
            event.severity().as_str(),
            event.as_str(),
            message,
            details_str
        )
    }
}

/// Log a security event with structured details.
///
/// # Example
/// ```
/// use gg_sandbox::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::DangerousPackageFiltered,
///     "package removed from install set",
///     &[("session", "abc"), ("package", "child_process")],
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let line = format_security_line(timestamp, event, message, details);

    match event.severity() {
        SecuritySeverity::Debug => tracing::debug!(event = event.as_str(), "{}", line),
        SecuritySeverity::Info => tracing::info!(event = event.as_str(), "{}", line),
        SecuritySeverity::Warning => tracing::warn!(event = event.as_str(), "{}", line),
        SecuritySeverity::Error | SecuritySeverity::Critical => {
            tracing::error!(event = event.as_str(), "{}", line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_severity() {
        assert_eq!(SecurityEvent::ScanRejected.severity(), SecuritySeverity::Critical);
        assert_eq!(
            SecurityEvent::DangerousPackageFiltered.severity(),
            SecuritySeverity::Warning
        );
        assert_eq!(SecurityEvent::ConcurrencyLimitHit.severity(), SecuritySeverity::Info);
    }

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(
            SecurityEvent::DangerousPackageFiltered.as_str(),
            "dangerous_package_filtered"
        );
        assert_eq!(SecurityEvent::ConcurrencyLimitHit.as_str(), "concurrency_limit_hit");
        assert_eq!(SecurityEvent::ResourceLimitHit.as_str(), "resource_limit_hit");
    }

    #[test]
    fn test_event_categories() {
        assert_eq!(SecurityEvent::ScanRejected.category(), AuditCategory::CodeScan);
        assert_eq!(
            SecurityEvent::InvalidPackageName.category(),
            AuditCategory::Dependency
        );
        assert_eq!(SecurityEvent::ExecutionTimeout.category(), AuditCategory::Execution);
    }

    #[test]
    fn test_format_security_line() {
        let line = format_security_line(
            42,
            SecurityEvent::ResourceLimitHit,
            "host memory above threshold",
            &[("violation", "memory_critical")],
        );
        assert_eq!(
            line,
            "[42] SECURITY WARNING resource_limit_hit: host memory above threshold | violation=memory_critical"
        );
        let bare = format_security_line(1, SecurityEvent::ScanRejected, "nope", &[]);
        assert_eq!(bare, "[1] SECURITY CRITICAL scan_rejected: nope");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(SecuritySeverity::Critical > SecuritySeverity::Error);
        assert!(SecuritySeverity::Warning > SecuritySeverity::Info);
        assert_eq!(SecuritySeverity::Debug.to_audit(), AuditSeverity::Info);
    }
}
