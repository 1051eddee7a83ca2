//! Fuzz target for the risk scanner.
//!
//! Arbitrary input must never panic the scanner, and the verdict must stay
//! consistent with the issues it reports.

#![no_main]

use gg_sandbox::security::{RiskLevel, RiskScanner, Severity};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let scanner = RiskScanner::default();
    let result = scanner.scan(data);

    let has_critical = result.issues.iter().any(|i| i.severity == Severity::Critical);
    assert_eq!(result.safe, !has_critical, "verdict disagrees with issues");
    if has_critical {
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }
    assert_eq!(result.risk_level, RiskLevel::from_score(result.score()));

    // Same input, same answer.
    assert_eq!(scanner.scan(data), result);
});
