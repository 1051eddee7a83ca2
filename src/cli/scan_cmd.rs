//! `scan` subcommand: run the risk scanner only.

use super::exit;
use crate::config::EngineLimits;
use crate::security::{RiskScanner, ScanResult};

/// Scan a file (or stdin) and print the assessment.
///
/// Exits 0 when the code is safe to run, 3 when it would be rejected.
pub fn run_scan(limits: &EngineLimits, source: &str, json: bool) -> i32 {
    let code = match super::read_source(source) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", source, e);
            return exit::USAGE;
        }
    };

    let scan = RiskScanner::new(limits.scanner_config()).scan(&code);
    if json {
        match serde_json::to_string_pretty(&scan) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit::FAILURE;
            }
        }
    } else {
        print!("{}", render(&scan));
    }

    if scan.safe {
        exit::SUCCESS
    } else {
        exit::REJECTED
    }
}

fn render(scan: &ScanResult) -> String {
    let mut out = format!(
        "risk: {} (score {}), {}\n",
        scan.risk_level,
        scan.score(),
        if scan.safe { "safe" } else { "REJECTED" }
    );
    for issue in &scan.issues {
        let at = issue
            .location
            .map(|l| format!(" @{}", l))
            .unwrap_or_default();
        out.push_str(&format!(
            "  [{}] {}{}: {}\n",
            issue.severity.as_str(),
            issue.kind.as_str(),
            at,
            issue.description
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_issues() {
        let scan = RiskScanner::default().scan("require('fs').readFileSync('/etc/passwd')");
        let text = render(&scan);
        assert!(text.contains("REJECTED"));
        assert!(text.contains("dangerous_package"));
    }

    #[test]
    fn test_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let safe = dir.path().join("ok.js");
        let bad = dir.path().join("bad.js");
        std::fs::write(&safe, "console.log('hi')").unwrap();
        std::fs::write(&bad, "require('child_process').exec('ls')").unwrap();
        let limits = EngineLimits::default();
        assert_eq!(run_scan(&limits, safe.to_str().unwrap(), false), exit::SUCCESS);
        assert_eq!(run_scan(&limits, bad.to_str().unwrap(), true), exit::REJECTED);
    }
}
