// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used across all pipeline stages. Diagnostics are
// either returned from a pass directly or attached to AST nodes and
// collected by the driver at stage boundaries; any error-level diagnostic
// present at a boundary halts the pipeline.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::meta::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0001`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable code constants. Grouped by pipeline stage.
pub mod codes {
    use super::DiagCode;

    // Parsing / input.
    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0002: DiagCode = DiagCode("E0002"); // no plugin for extension
    pub const E0003: DiagCode = DiagCode("E0003"); // import not found

    // Name resolution.
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown ID
    pub const E0102: DiagCode = DiagCode("E0102"); // ambiguous ID
    pub const E0103: DiagCode = DiagCode("E0103"); // access to non-public declaration
    pub const E0104: DiagCode = DiagCode("E0104"); // `$$` outside valid context

    // Operator resolution.
    pub const E0201: DiagCode = DiagCode("E0201"); // no matching operator
    pub const E0202: DiagCode = DiagCode("E0202"); // ambiguous operator
    pub const E0203: DiagCode = DiagCode("E0203"); // type mismatch

    // Type unification.
    pub const E0301: DiagCode = DiagCode("E0301"); // cycle in type definition

    // Grammar / LL(1).
    pub const E0401: DiagCode = DiagCode("E0401"); // both look-ahead alternatives nullable
    pub const E0402: DiagCode = DiagCode("E0402"); // FIRST sets not disjoint
    pub const E0403: DiagCode = DiagCode("E0403"); // unresolved deferred production

    // Driver.
    pub const E0501: DiagCode = DiagCode("E0501"); // resolver did not converge

    // Validation.
    pub const E0601: DiagCode = DiagCode("E0601"); // invalid attribute placement
    pub const E0602: DiagCode = DiagCode("E0602"); // invalid unit property

    // Warnings.
    pub const W0001: DiagCode = DiagCode("W0001"); // unused declaration
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any stage.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message)
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}
