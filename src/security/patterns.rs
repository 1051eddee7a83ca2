//! Pattern tables for the risk scanner.
//!
//! Rules are data, not control flow: each entry names the issue it raises,
//! a literal trigger that must appear in any match, and a regex. Triggers
//! feed a single Aho-Corasick automaton so only rules whose keyword is
//! present ever run their regex. The `regex` crate guarantees linear-time
//! matching, so no rule can stall a scan.

use aho_corasick::AhoCorasick;
use regex::Regex;
use thiserror::Error;

use super::{Issue, IssueKind, Severity};

/// One entry in a pattern table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PatternRule {
    pub kind: IssueKind,
    pub severity: Severity,
    /// Literals of which at least one occurs in every match of `regex`.
    pub triggers: &'static [&'static str],
    pub regex: &'static str,
    pub description: &'static str,
}

/// Expands to the alternation of host-capability modules.
macro_rules! host_modules {
    () => {
        "fs|fs/promises|child_process|net|http|https|http2|dgram|dns|tls|os|cluster|worker_threads|vm|v8|process|inspector|module|repl"
    };
}

/// Pattern layer: imports of host-capability modules (critical) and
/// generic suspicious constructs (high).
pub(crate) const PATTERN_RULES: &[PatternRule] = &[
    PatternRule {
        kind: IssueKind::DangerousPackage,
        severity: Severity::Critical,
        triggers: &["require"],
        regex: concat!(
            r#"\brequire\s*\(\s*['"`](?:node:)?(?:"#,
            host_modules!(),
            r#")['"`]\s*\)"#
        ),
        description: "require() of a module with host, network or process access",
    },
    PatternRule {
        kind: IssueKind::DangerousPackage,
        severity: Severity::Critical,
        triggers: &["import"],
        regex: concat!(
            r#"\bimport\s+(?:[^;'"`]*?\bfrom\s*)?['"](?:node:)?(?:"#,
            host_modules!(),
            r#")['"]"#
        ),
        description: "static import of a module with host, network or process access",
    },
    PatternRule {
        kind: IssueKind::DangerousPackage,
        severity: Severity::Critical,
        triggers: &["import"],
        regex: concat!(
            r#"\bimport\s*\(\s*['"`](?:node:)?(?:"#,
            host_modules!(),
            r#")['"`]\s*\)"#
        ),
        description: "dynamic import() of a module with host, network or process access",
    },
    PatternRule {
        kind: IssueKind::DangerousPackage,
        severity: Severity::Critical,
        triggers: &["process"],
        regex: r"\bprocess\s*\.\s*(?:binding|_linkedBinding|dlopen|mainModule)\b",
        description: "access to native bindings or the main module through process",
    },
    PatternRule {
        kind: IssueKind::ProcessControl,
        severity: Severity::High,
        triggers: &["process"],
        regex: r"\bprocess\s*\.\s*(?:exit|kill|abort|chdir|setuid|setgid|umask)\s*\(",
        description: "direct control of the hosting process",
    },
    PatternRule {
        kind: IssueKind::DynamicCode,
        severity: Severity::High,
        triggers: &["eval"],
        regex: r"\beval\s*\(",
        description: "eval() executes arbitrary strings as code",
    },
    PatternRule {
        kind: IssueKind::DynamicCode,
        severity: Severity::High,
        triggers: &["Function"],
        regex: r"\bnew\s+Function\s*\(",
        description: "Function constructor builds code from strings",
    },
    PatternRule {
        kind: IssueKind::DynamicCode,
        severity: Severity::High,
        triggers: &["constructor"],
        regex: r#"\bconstructor\s*\.\s*constructor\b|\bconstructor\s*\[\s*['"`]constructor['"`]\s*\]"#,
        description: "constructor chain walk used to reach the Function constructor",
    },
    PatternRule {
        kind: IssueKind::PathTraversal,
        severity: Severity::High,
        triggers: &["../", "..\\"],
        regex: r"\.\.[/\\]",
        description: "relative path escaping the working directory",
    },
    PatternRule {
        kind: IssueKind::ShellCommand,
        severity: Severity::High,
        triggers: &["rm"],
        regex: r"\brm\s+-(?:[a-zA-Z]*r[a-zA-Z]*f|[a-zA-Z]*f[a-zA-Z]*r)\b",
        description: "recursive forced delete",
    },
    PatternRule {
        kind: IssueKind::ShellCommand,
        severity: Severity::High,
        triggers: &["mkfs", "dd"],
        regex: r"\bmkfs(?:\.\w+)?\b|\bdd\s+if=",
        description: "raw device write or filesystem creation",
    },
    PatternRule {
        kind: IssueKind::ShellCommand,
        severity: Severity::High,
        triggers: &["chmod"],
        regex: r"\bchmod\s+(?:-R\s+)?0?777\b",
        description: "world-writable permission change",
    },
    PatternRule {
        kind: IssueKind::ShellCommand,
        severity: Severity::High,
        triggers: &[":()"],
        regex: r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        description: "fork bomb",
    },
    PatternRule {
        kind: IssueKind::PrototypePollution,
        severity: Severity::High,
        triggers: &["__proto__"],
        regex: r"__proto__",
        description: "prototype chain tampering",
    },
];

/// Heuristic layer: DOM and global-object risks. Only run on code that
/// passed the structural check.
pub(crate) const DOM_RULES: &[PatternRule] = &[
    PatternRule {
        kind: IssueKind::DomInjection,
        severity: Severity::Medium,
        triggers: &["HTML"],
        regex: r"\.\s*(?:inner|outer)HTML\s*(?:\+)?=[^=]",
        description: "HTML assigned through innerHTML/outerHTML",
    },
    PatternRule {
        kind: IssueKind::DomInjection,
        severity: Severity::Medium,
        triggers: &["document"],
        regex: r"\bdocument\s*\.\s*write(?:ln)?\s*\(",
        description: "document.write injects raw markup",
    },
    PatternRule {
        kind: IssueKind::DomInjection,
        severity: Severity::Medium,
        triggers: &["insertAdjacentHTML"],
        regex: r"\.\s*insertAdjacentHTML\s*\(",
        description: "insertAdjacentHTML injects raw markup",
    },
    PatternRule {
        kind: IssueKind::DynamicCode,
        severity: Severity::Medium,
        triggers: &["Function"],
        regex: r"\bFunction\s*\(",
        description: "Function called to construct code at runtime",
    },
    PatternRule {
        kind: IssueKind::DynamicCode,
        severity: Severity::Medium,
        triggers: &["setTimeout", "setInterval"],
        regex: r#"\bset(?:Timeout|Interval)\s*\(\s*['"`]"#,
        description: "timer scheduled with a string body",
    },
    PatternRule {
        kind: IssueKind::GlobalAccess,
        severity: Severity::Medium,
        triggers: &["window", "globalThis", "self"],
        regex: r#"\b(?:window|globalThis|self)\s*\[\s*[^\]\s'"`]"#,
        description: "computed property access on the global object",
    },
];

/// Interactive-input sources for the data-flow heuristic.
pub(crate) const INPUT_SOURCES: &[PatternRule] = &[PatternRule {
    kind: IssueKind::UnsafeDataFlow,
    severity: Severity::High,
    triggers: &["prompt", "confirm"],
    regex: r"\b(?:prompt|confirm)\s*\(",
    description: "interactive input",
}];

/// Dangerous sinks for the data-flow heuristic.
pub(crate) const DANGEROUS_SINKS: &[PatternRule] = &[
    PatternRule {
        kind: IssueKind::UnsafeDataFlow,
        severity: Severity::High,
        triggers: &["HTML"],
        regex: r"\.\s*(?:inner|outer)HTML\b",
        description: "HTML sink",
    },
    PatternRule {
        kind: IssueKind::UnsafeDataFlow,
        severity: Severity::High,
        triggers: &["eval"],
        regex: r"\beval\s*\(",
        description: "eval sink",
    },
    PatternRule {
        kind: IssueKind::UnsafeDataFlow,
        severity: Severity::High,
        triggers: &["setTimeout", "setInterval"],
        regex: r#"\bset(?:Timeout|Interval)\s*\(\s*['"`]"#,
        description: "string timer sink",
    },
];

/// Errors building a pattern table.
#[derive(Debug, Error)]
pub(crate) enum TableError {
    #[error("invalid rule regex: {0}")]
    Regex(#[from] regex::Error),
    #[error("invalid trigger set: {0}")]
    Prefilter(#[from] aho_corasick::BuildError),
}

struct CompiledRule {
    rule: PatternRule,
    regex: Regex,
}

/// A pattern table ready to run.
pub(crate) struct CompiledTable {
    rules: Vec<CompiledRule>,
    prefilter: AhoCorasick,
    /// For each prefilter pattern, the rules it arms.
    armed_by: Vec<Vec<usize>>,
}

impl CompiledTable {
    pub fn new(rules: &'static [PatternRule]) -> Result<Self, TableError> {
        let mut triggers: Vec<&'static str> = Vec::new();
        let mut armed_by: Vec<Vec<usize>> = Vec::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for (index, rule) in rules.iter().enumerate() {
            for trigger in rule.triggers {
                match triggers.iter().position(|t| t == trigger) {
                    Some(pos) => armed_by[pos].push(index),
                    None => {
                        triggers.push(trigger);
                        armed_by.push(vec![index]);
                    }
                }
            }
            compiled.push(CompiledRule {
                rule: *rule,
                regex: Regex::new(rule.regex)?,
            });
        }

        Ok(Self {
            rules: compiled,
            prefilter: AhoCorasick::new(&triggers)?,
            armed_by,
        })
    }

    /// Indices of rules whose trigger occurs in `text`.
    fn armed(&self, text: &str) -> Vec<bool> {
        let mut armed = vec![false; self.rules.len()];
        let mut remaining = self.rules.len();
        for m in self.prefilter.find_overlapping_iter(text) {
            for &index in &self.armed_by[m.pattern().as_usize()] {
                if !armed[index] {
                    armed[index] = true;
                    remaining -= 1;
                }
            }
            if remaining == 0 {
                break;
            }
        }
        armed
    }

    /// Run every armed rule and report its first match as an issue.
    pub fn scan(&self, text: &str) -> Vec<Issue> {
        let armed = self.armed(text);
        self.rules
            .iter()
            .zip(armed)
            .filter(|(_, armed)| *armed)
            .filter_map(|(compiled, _)| {
                compiled.regex.find(text).map(|m| Issue {
                    kind: compiled.rule.kind,
                    severity: compiled.rule.severity,
                    description: compiled.rule.description.to_string(),
                    matched_pattern: m.as_str().to_string(),
                    location: Some(m.start()),
                })
            })
            .collect()
    }

    /// True if any rule matches.
    pub fn is_match(&self, text: &str) -> bool {
        let armed = self.armed(text);
        self.rules
            .iter()
            .zip(armed)
            .any(|(compiled, armed)| armed && compiled.regex.is_match(text))
    }
}
