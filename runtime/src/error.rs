// error.rs — Runtime error taxonomy
//
// Errors a generated parser or a host application can observe at runtime.
// `WouldBlock` is deliberately not part of the error enum: it is an internal
// flow-control signal ("need more input") that the stream primitives convert
// into a fiber yield before it can ever reach a host.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: `internal_error` aborts the process.

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

// ── Parse errors ─────────────────────────────────────────────────────────

/// Input did not match the grammar: a literal failed to match, a look-ahead
/// was ambiguous at runtime, or the stream ended mid-field. Recoverable at
/// the analyzer level; the analyzer is marked skipped from that point.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parse error: {message}{}", .position.map(|p| format!(" (input offset {p})")).unwrap_or_default())]
pub struct ParseError {
    pub message: String,
    /// Absolute stream offset at which the mismatch was detected.
    pub position: Option<u64>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: Option<u64>) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

// ── Runtime errors ───────────────────────────────────────────────────────

/// Programmer-visible runtime failures. These abort the current parser unit;
/// the host sees the diagnostic with whatever location the generated code
/// attached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("index {index} out of range (size {size})")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("unset optional value")]
    UnsetOptional,

    #[error("attempt to dereference null reference")]
    NullReference,

    #[error("error compiling pattern: {0}")]
    PatternError(String),

    #[error("illegal character in input: cannot decode as {encoding}")]
    DecodeError { encoding: &'static str },

    #[error("stack size exceeded")]
    StackExceeded,

    #[error("'yield' in non-suspendable context")]
    YieldOutsideFiber,

    #[error("{0}")]
    Other(String),
}

// ── Usage errors ─────────────────────────────────────────────────────────

/// Misuse of the runtime's own API. Fatal to the current analyzer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("finish() called on already-finished parser")]
    DoubleFinish,

    #[error("matcher state cannot be reused after final match decision")]
    MatchStateReuse,

    #[error("data fed into parser after stream was frozen")]
    FeedAfterFreeze,

    #[error("{0}")]
    Other(String),
}

// ── Aggregate host-visible error ─────────────────────────────────────────

/// Any error a host can observe from a running parser.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    /// A fiber died from an unexpected panic; invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

// ── WouldBlock ───────────────────────────────────────────────────────────

/// Internal signal: the operation needs more input than the stream currently
/// holds. Stream primitives turn this into a fiber yield; it never surfaces
/// to a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

// ── Abort-on-error test configuration ────────────────────────────────────

static ABORT_ON_ERROR: AtomicBool = AtomicBool::new(false);

/// When enabled, a runtime error captured inside a fiber aborts the process
/// instead of propagating to the host. Intended for tests.
pub fn set_abort_on_error(enabled: bool) {
    ABORT_ON_ERROR.store(enabled, Ordering::Relaxed);
}

pub fn abort_on_error() -> bool {
    ABORT_ON_ERROR.load(Ordering::Relaxed)
}

// ── Internal errors ──────────────────────────────────────────────────────

/// Invariant violation inside the runtime. Prints a backtrace and aborts the
/// process; there is no recovery path.
pub fn internal_error(message: &str) -> ! {
    eprintln!("spicy-rt: internal error: {message}");
    eprintln!("{}", Backtrace::force_capture());
    std::process::abort();
}
