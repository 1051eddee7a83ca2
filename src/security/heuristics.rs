//! Heuristic scan layer.
//!
//! A structural validity check stands in for a parser: it walks the code
//! once, tracking strings, template literals, comments and bracket nesting.
//! Code that fails the check degrades to a medium "unparsable" issue; code
//! that passes gets a DOM/global-object pattern pass and a source-to-sink
//! data-flow heuristic. Nothing here returns an error.

use std::sync::OnceLock;

use super::patterns::{CompiledTable, DANGEROUS_SINKS, DOM_RULES, INPUT_SOURCES};
use super::{Issue, IssueKind, Severity};

/// Maximum bracket nesting accepted by the structural check.
const MAX_NESTING: usize = 512;

/// Why the structural check rejected the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StructureError {
    UnterminatedString { offset: usize },
    UnterminatedTemplate { offset: usize },
    UnterminatedComment { offset: usize },
    UnexpectedCloser { offset: usize, found: char },
    UnclosedBracket { offset: usize, open: char },
    TooDeep { offset: usize },
}

impl StructureError {
    fn describe(&self) -> String {
        match self {
            Self::UnterminatedString { offset } => format!("unterminated string at byte {}", offset),
            Self::UnterminatedTemplate { offset } => {
                format!("unterminated template literal at byte {}", offset)
            }
            Self::UnterminatedComment { offset } => {
                format!("unterminated block comment at byte {}", offset)
            }
            Self::UnexpectedCloser { offset, found } => {
                format!("unexpected '{}' at byte {}", found, offset)
            }
            Self::UnclosedBracket { offset, open } => {
                format!("'{}' opened at byte {} is never closed", open, offset)
            }
            Self::TooDeep { offset } => format!("nesting deeper than {} at byte {}", MAX_NESTING, offset),
        }
    }

    fn offset(&self) -> usize {
        match self {
            Self::UnterminatedString { offset }
            | Self::UnterminatedTemplate { offset }
            | Self::UnterminatedComment { offset }
            | Self::UnexpectedCloser { offset, .. }
            | Self::UnclosedBracket { offset, .. }
            | Self::TooDeep { offset } => *offset,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Paren(usize),
    Bracket(usize),
    Brace(usize),
    /// `${` inside a template literal; `}` resumes the template.
    TemplateExpr(usize),
}

impl Frame {
    fn open_char(&self) -> (char, usize) {
        match *self {
            Self::Paren(o) => ('(', o),
            Self::Bracket(o) => ('[', o),
            Self::Brace(o) => ('{', o),
            Self::TemplateExpr(o) => ('{', o),
        }
    }
}

/// Linear structural validity check over `code`.
pub(crate) fn check_structure(code: &str) -> Result<(), StructureError> {
    let bytes = code.as_bytes();
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                i += 2;
                loop {
                    if i + 1 >= bytes.len() {
                        return Err(StructureError::UnterminatedComment { offset: start });
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                continue;
            }
            b'\'' | b'"' => {
                i = skip_quoted(bytes, i)?;
                continue;
            }
            b'`' => {
                match skip_template(bytes, i + 1, i)? {
                    TemplateStop::Closed(next) => i = next,
                    TemplateStop::Expr(next) => {
                        push(&mut stack, Frame::TemplateExpr(next - 2), next - 2)?;
                        i = next;
                    }
                }
                continue;
            }
            b'(' => push(&mut stack, Frame::Paren(i), i)?,
            b'[' => push(&mut stack, Frame::Bracket(i), i)?,
            b'{' => push(&mut stack, Frame::Brace(i), i)?,
            b')' | b']' | b'}' => match (stack.pop(), b) {
                (Some(Frame::Paren(_)), b')')
                | (Some(Frame::Bracket(_)), b']')
                | (Some(Frame::Brace(_)), b'}') => {}
                (Some(Frame::TemplateExpr(open)), b'}') => {
                    // Resume the enclosing template literal.
                    match skip_template(bytes, i + 1, open)? {
                        TemplateStop::Closed(next) => i = next,
                        TemplateStop::Expr(next) => {
                            push(&mut stack, Frame::TemplateExpr(next - 2), next - 2)?;
                            i = next;
                        }
                    }
                    continue;
                }
                _ => {
                    return Err(StructureError::UnexpectedCloser {
                        offset: i,
                        found: b as char,
                    })
                }
            },
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        None => Ok(()),
        Some(Frame::TemplateExpr(offset)) => Err(StructureError::UnterminatedTemplate { offset }),
        Some(frame) => {
            let (open, offset) = frame.open_char();
            Err(StructureError::UnclosedBracket { offset, open })
        }
    }
}

fn push(stack: &mut Vec<Frame>, frame: Frame, offset: usize) -> Result<(), StructureError> {
    if stack.len() >= MAX_NESTING {
        return Err(StructureError::TooDeep { offset });
    }
    stack.push(frame);
    Ok(())
}

/// Skip a single- or double-quoted string starting at `start`; returns the
/// index after the closing quote.
fn skip_quoted(bytes: &[u8], start: usize) -> Result<usize, StructureError> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(StructureError::UnterminatedString { offset: start })
}

enum TemplateStop {
    /// Index after the closing backtick.
    Closed(usize),
    /// Index after a `${`.
    Expr(usize),
}

fn skip_template(bytes: &[u8], from: usize, open: usize) -> Result<TemplateStop, StructureError> {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return Ok(TemplateStop::Closed(i + 1)),
            b'$' if bytes.get(i + 1) == Some(&b'{') => return Ok(TemplateStop::Expr(i + 2)),
            _ => i += 1,
        }
    }
    Err(StructureError::UnterminatedTemplate { offset: open })
}

fn dom_table() -> &'static CompiledTable {
    static TABLE: OnceLock<CompiledTable> = OnceLock::new();
    TABLE.get_or_init(|| CompiledTable::new(DOM_RULES).expect("static DOM rules must compile"))
}

fn source_table() -> &'static CompiledTable {
    static TABLE: OnceLock<CompiledTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        CompiledTable::new(INPUT_SOURCES).expect("static input-source rules must compile")
    })
}

fn sink_table() -> &'static CompiledTable {
    static TABLE: OnceLock<CompiledTable> = OnceLock::new();
    TABLE.get_or_init(|| CompiledTable::new(DANGEROUS_SINKS).expect("static sink rules must compile"))
}

/// Run the heuristic layer over normalized code.
pub(crate) fn analyze(code: &str) -> Vec<Issue> {
    if let Err(err) = check_structure(code) {
        return vec![Issue {
            kind: IssueKind::Unparsable,
            severity: Severity::Medium,
            description: format!(
                "code is not a structurally valid function body ({}); obfuscation risk",
                err.describe()
            ),
            matched_pattern: String::new(),
            location: Some(err.offset()),
        }];
    }

    let mut issues = dom_table().scan(code);

    if source_table().is_match(code) && sink_table().is_match(code) {
        issues.push(Issue {
            kind: IssueKind::UnsafeDataFlow,
            severity: Severity::High,
            description: "unsanitized input reaches dangerous sink".to_string(),
            matched_pattern: String::new(),
            location: None,
        });
    }

    issues
}
