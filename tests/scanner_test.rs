//! Tests for the static risk scanner.

use gg_sandbox::security::{IssueKind, RiskLevel, RiskScanner, ScannerConfig, Severity};

fn scan(code: &str) -> gg_sandbox::ScanResult {
    RiskScanner::default().scan(code)
}

#[test]
fn test_clean_code_is_low_risk() {
    for code in [
        "console.log('hello world')",
        "const add = (a, b) => a + b;\nconsole.log(add(2, 3));",
        "const data = JSON.parse('{\"a\":1}');\nfor (const k of Object.keys(data)) console.log(k);",
        "",
    ] {
        let result = scan(code);
        assert!(result.safe, "{:?} flagged: {}", code, result.summary());
        assert!(result.issues.is_empty(), "{:?}: {}", code, result.summary());
        assert_eq!(result.risk_level, RiskLevel::Low);
    }
}

#[test]
fn test_host_modules_are_critical() {
    for code in [
        "const cp = require('child_process');",
        "require(\"fs\").readFileSync('/etc/passwd')",
        "import net from 'net';",
        "import { exec } from \"node:child_process\";",
        "const m = await import('http');",
        "process.binding('spawn_sync')",
    ] {
        let result = scan(code);
        assert!(!result.safe, "{:?} passed", code);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::DangerousPackage && i.severity == Severity::Critical));
    }
}

#[test]
fn test_high_severity_is_reported_but_safe() {
    let result = scan("eval('1 + 1')");
    assert!(result.safe);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert_eq!(result.issues[0].kind, IssueKind::DynamicCode);
    assert_eq!(result.issues[0].location, Some(0));
}

#[test]
fn test_library_modules_are_not_flagged() {
    let result = scan("const _ = require('lodash'); const fsx = require('fs-utils-lite');");
    assert!(result.safe, "{}", result.summary());
}

#[test]
fn test_string_concatenation_does_not_hide_eval() {
    let result = scan("const e = eval ( atob('ZXZpbA==') );");
    assert!(result.issues.iter().any(|i| i.kind == IssueKind::DynamicCode));
}

#[test]
fn test_compatibility_forms_are_normalized() {
    // Decomposed e + combining acute normalizes to the composed form, so
    // the scan sees the same text either way.
    let composed = scan("const caf\u{e9} = require('fs');");
    let decomposed = scan("const cafe\u{301} = require('fs');");
    assert_eq!(composed.safe, decomposed.safe);
    assert_eq!(composed.risk_level, decomposed.risk_level);
}

#[test]
fn test_adding_code_never_lowers_risk() {
    let base = "const x = 1;\n";
    let additions = [
        "eval('x');\n",
        "obj.__proto__.polluted = true;\n",
        "document.body.innerHTML = input;\n",
        "require('child_process');\n",
        "fs.readFile('../../etc/passwd');\n",
    ];

    let mut code = base.to_string();
    let mut previous = scan(&code);
    for addition in additions {
        code.push_str(addition);
        let current = scan(&code);
        assert!(
            current.risk_level >= previous.risk_level,
            "risk dropped from {} to {} after {:?}",
            previous.risk_level,
            current.risk_level,
            addition
        );
        assert!(current.score() >= previous.score());
        previous = current;
    }
    assert_eq!(previous.risk_level, RiskLevel::Critical);
}

#[test]
fn test_scan_is_deterministic() {
    let code = "const q = prompt('x'); eval(q); window[q] = 1;";
    let first = scan(code);
    for _ in 0..5 {
        assert_eq!(scan(code), first);
    }
}

#[test]
fn test_unbalanced_code_degrades_to_medium() {
    let result = scan("function broken( { console.log('x'); ");
    assert!(result.safe);
    assert!(result
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::Unparsable && i.severity == Severity::Medium));
}

#[test]
fn test_interactive_input_to_sink() {
    let result = scan("const cmd = prompt('cmd?');\neval(cmd);");
    assert!(result
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::UnsafeDataFlow));
    assert!(result.risk_level >= RiskLevel::High);
}

#[test]
fn test_oversized_payload() {
    let scanner = RiskScanner::new(ScannerConfig { max_code_bytes: 16 });
    let result = scanner.scan("console.log('this is longer than sixteen bytes')");
    assert!(result.safe);
    assert!(result
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::OversizedPayload));
}

#[test]
fn test_shell_commands_flagged() {
    for code in ["rm -rf /", "dd if=/dev/zero of=/dev/sda", ":(){ :|:& };:", "chmod 777 /tmp"] {
        let result = scan(code);
        assert!(
            result.issues.iter().any(|i| i.kind == IssueKind::ShellCommand),
            "{:?} not flagged",
            code
        );
    }
}
