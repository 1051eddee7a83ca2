//! Security module for GG-SANDBOX
//!
//! This module provides the static screening and audit features:
//! - Risk scanning of submitted code (pattern and heuristic layers)
//! - Security audit events and the audit sink contract

pub mod audit;
mod heuristics;
mod patterns;
mod scanner;

pub use audit::{AuditCategory, AuditEvent, AuditLogger, AuditSeverity, AuditSink, NullAuditSink};
pub use scanner::{RiskScanner, ScannerConfig};

use serde::{Deserialize, Serialize};

/// Severity of a single scan issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight contributed to the risk score.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 5,
            Self::Critical => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Coarse classification derived from the weighted issue score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a weighted score: >=10 critical, >=5 high, >=2 medium.
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 10 => Self::Critical,
            s if s >= 5 => Self::High,
            s if s >= 2 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of scan issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Import of a module that grants host, network or process access
    DangerousPackage,
    /// Direct manipulation of the hosting process
    ProcessControl,
    /// `eval` or runtime function construction
    DynamicCode,
    /// `../` style path escapes
    PathTraversal,
    /// Destructive shell commands embedded in the snippet
    ShellCommand,
    /// Prototype chain tampering
    PrototypePollution,
    /// HTML injection through DOM APIs
    DomInjection,
    /// Dynamic property access on the global object
    GlobalAccess,
    /// Interactive input reaching a dangerous sink
    UnsafeDataFlow,
    /// Code that fails the structural validity check
    Unparsable,
    /// Payload larger than the configured ceiling
    OversizedPayload,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DangerousPackage => "dangerous_package",
            Self::ProcessControl => "process_control",
            Self::DynamicCode => "dynamic_code",
            Self::PathTraversal => "path_traversal",
            Self::ShellCommand => "shell_command",
            Self::PrototypePollution => "prototype_pollution",
            Self::DomInjection => "dom_injection",
            Self::GlobalAccess => "global_access",
            Self::UnsafeDataFlow => "unsafe_data_flow",
            Self::Unparsable => "unparsable",
            Self::OversizedPayload => "oversized_payload",
        }
    }
}

/// A single finding produced by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    /// Text that triggered the finding (empty for whole-input findings).
    pub matched_pattern: String,
    /// Byte offset in the normalized code, if the finding is local.
    pub location: Option<usize>,
}

/// Outcome of a risk scan. Never persisted beyond the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// True iff no issue is critical.
    pub safe: bool,
    pub issues: Vec<Issue>,
    pub risk_level: RiskLevel,
}

impl ScanResult {
    /// Build a result from a final issue set.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let safe = !issues.iter().any(|i| i.severity == Severity::Critical);
        let risk_level = RiskLevel::from_score(risk_score(&issues));
        Self {
            safe,
            issues,
            risk_level,
        }
    }

    /// Weighted score of all issues.
    pub fn score(&self) -> u32 {
        risk_score(&self.issues)
    }

    /// Issues at or above the given severity.
    pub fn issues_at_least(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity >= severity)
    }

    /// Short human-readable summary of the issue kinds.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return "no issues".to_string();
        }
        let kinds: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{}({})", i.kind.as_str(), i.severity.as_str()))
            .collect();
        format!("risk={} [{}]", self.risk_level, kinds.join(", "))
    }
}

fn risk_score(issues: &[Issue]) -> u32 {
    issues
        .iter()
        .fold(0u32, |acc, i| acc.saturating_add(i.severity.weight()))
}
