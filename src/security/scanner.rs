//! Risk scanner for submitted code.
//!
//! Pure and synchronous: code text in, [`ScanResult`] out. Two layers run
//! over the NFC-normalized code and their issues are unioned; the verdict
//! and risk level are computed last from the combined set.

use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

use super::heuristics;
use super::patterns::{CompiledTable, PATTERN_RULES};
use super::{Issue, IssueKind, ScanResult, Severity};

/// Default payload ceiling (100 KiB).
pub const DEFAULT_MAX_CODE_BYTES: usize = 100 * 1024;

/// Scanner configuration.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Code larger than this raises a medium `oversized_payload` issue.
    pub max_code_bytes: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
        }
    }
}

fn pattern_table() -> &'static CompiledTable {
    static TABLE: OnceLock<CompiledTable> = OnceLock::new();
    TABLE.get_or_init(|| CompiledTable::new(PATTERN_RULES).expect("static pattern rules must compile"))
}

/// Static risk scanner.
#[derive(Debug, Clone, Default)]
pub struct RiskScanner {
    config: ScannerConfig,
}

impl RiskScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan `code` and classify its risk.
    pub fn scan(&self, code: &str) -> ScanResult {
        let normalized: String = code.nfc().collect();

        let mut issues = pattern_table().scan(&normalized);
        for issue in heuristics::analyze(&normalized) {
            if !overlaps_existing(&issues, &issue) {
                issues.push(issue);
            }
        }

        if code.len() > self.config.max_code_bytes {
            issues.push(Issue {
                kind: IssueKind::OversizedPayload,
                severity: Severity::Medium,
                description: format!(
                    "code is {} bytes, above the {} byte ceiling",
                    code.len(),
                    self.config.max_code_bytes
                ),
                matched_pattern: String::new(),
                location: None,
            });
        }

        ScanResult::from_issues(issues)
    }
}

/// A heuristic finding duplicates a pattern finding when both are the same
/// kind and their matched spans overlap.
fn overlaps_existing(existing: &[Issue], candidate: &Issue) -> bool {
    let Some(start) = candidate.location else {
        return false;
    };
    let end = start + candidate.matched_pattern.len();
    existing.iter().any(|issue| {
        issue.kind == candidate.kind
            && issue.location.is_some_and(|s| {
                let e = s + issue.matched_pattern.len();
                s < end && start < e
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::RiskLevel;

    #[test]
    fn test_clean_code_is_low_risk() {
        let result = RiskScanner::default().scan("console.log('hi')");
        assert!(result.safe);
        assert!(result.issues.is_empty());
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_child_process_is_rejected() {
        let result = RiskScanner::default().scan("require('child_process').exec('ls')");
        assert!(!result.safe);
        assert_eq!(result.issues[0].kind, IssueKind::DangerousPackage);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_new_function_not_double_counted() {
        let result = RiskScanner::default().scan("const f = new Function('return 1');");
        let dynamic: Vec<_> = result
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::DynamicCode)
            .collect();
        assert_eq!(dynamic.len(), 1);
        assert_eq!(dynamic[0].severity, Severity::High);
    }

    #[test]
    fn test_oversized_payload() {
        let scanner = RiskScanner::new(ScannerConfig { max_code_bytes: 16 });
        let result = scanner.scan("console.log('this is long enough')");
        assert!(result.safe);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].kind, IssueKind::OversizedPayload);
        assert_eq!(result.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_decomposed_characters_are_normalized() {
        // "e\u{301}" composes to "é"; the dangerous part must still match.
        let result = RiskScanner::default().scan("// caf\u{65}\u{301}\nrequire('fs')");
        assert!(!result.safe);
    }

    #[test]
    fn test_scan_is_deterministic() {
        let scanner = RiskScanner::default();
        let code = "el.innerHTML = prompt('x'); eval(y); process.exit(1)";
        assert_eq!(scanner.scan(code), scanner.scan(code));
    }
}
