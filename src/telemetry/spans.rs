//! Span utilities for session tracing.

use sha2::{Digest, Sha256};
use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for session spans.
pub struct SessionSpan;

impl SessionSpan {
    /// Create a span for one session.
    ///
    /// The code itself never appears in logs; `code_sha256` identifies it.
    pub fn new(session_id: &str, code: &str, packages: usize) -> Span {
        info_span!(
            "sandbox_session",
            session_id = %session_id,
            code_sha256 = %code_digest(code),
            code_bytes = code.len(),
            packages,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        )
    }
}

/// Hex SHA-256 of the submitted code.
pub fn code_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}
