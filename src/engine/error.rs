//! Engine error taxonomy.
//!
//! Every refusal is fail-closed: nothing is provisioned after an error in an
//! earlier phase. Execution-phase failures (timeout, output overflow,
//! non-zero exit) are not errors; they are reported inside
//! [`ExecutionResult`](crate::exec::ExecutionResult) so captured output
//! survives.

use serde::Serialize;
use thiserror::Error;

use crate::exec::SupervisorError;
use crate::sandbox::installer::InstallError;
use crate::sandbox::SandboxError;
use crate::security::ScanResult;

/// Why admission was refused. No state exists for the session afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdmissionRefusal {
    #[error("at capacity: {active}/{max} sessions active")]
    AtCapacity { active: usize, max: usize },

    #[error("session {0} is already registered")]
    DuplicateSession(String),

    #[error("host resources unavailable: {}", violations.join(", "))]
    ResourcesUnavailable { violations: Vec<String> },

    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Errors returned by [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Code rejected: {}", scan.summary())]
    ScanRejected { scan: ScanResult },

    #[error("Admission refused: {0}")]
    AdmissionRefused(AdmissionRefusal),

    #[error("Sandbox provisioning failed: {0}")]
    Provision(#[from] SandboxError),

    #[error("Dependency install failed: {0}")]
    Install(#[from] InstallError),

    #[error("Execution supervisor failed: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),
}

/// The three caller-facing buckets: "your code was rejected", "try again
/// later", "it ran (or tried to) and failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Rejected,
    Unavailable,
    Failed,
}

impl From<AdmissionRefusal> for EngineError {
    fn from(refusal: AdmissionRefusal) -> Self {
        Self::AdmissionRefused(refusal)
    }
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ScanRejected { .. } | Self::InvalidSessionId(_) => ErrorCategory::Rejected,
            Self::Install(InstallError::PackageRejected { .. }) => ErrorCategory::Rejected,
            Self::AdmissionRefused(_) => ErrorCategory::Unavailable,
            Self::Provision(_) | Self::Install(_) | Self::Supervisor(_) => ErrorCategory::Failed,
        }
    }

    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRefused(
                AdmissionRefusal::AtCapacity { .. } | AdmissionRefusal::ResourcesUnavailable { .. }
            )
        )
    }

    /// Returns true if this error indicates a security concern.
    pub fn is_security_concern(&self) -> bool {
        matches!(
            self,
            Self::ScanRejected { .. }
                | Self::InvalidSessionId(_)
                | Self::Install(InstallError::PackageRejected { .. })
        )
    }

    /// The scan that caused a rejection, if any.
    pub fn scan(&self) -> Option<&ScanResult> {
        match self {
            Self::ScanRejected { scan } => Some(scan),
            _ => None,
        }
    }
}
