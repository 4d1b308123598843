// meta.rs — Source locations and node metadata
//
// Every AST node carries a `Meta`: the byte span of the construct, the file
// it came from, and any documentation comment the parser preserved. Spans
// are chumsky `SimpleSpan`s so parser errors and later diagnostics share
// one location type.

use std::fmt;
use std::sync::Arc;

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// A span pinned to no real location; used for synthesized nodes.
pub fn synthesized_span() -> Span {
    use chumsky::span::Span as _;
    Span::new((), 0..0)
}

/// Node metadata: location plus preserved documentation.
#[derive(Debug, Clone)]
pub struct Meta {
    pub span: Span,
    /// Source file, shared across all nodes of a module.
    pub file: Option<Arc<str>>,
    /// Documentation comment preceding the construct, verbatim.
    pub doc: Option<String>,
}

impl Meta {
    pub fn new(span: Span, file: Option<Arc<str>>) -> Self {
        Self {
            span,
            file,
            doc: None,
        }
    }

    /// Metadata for nodes the compiler synthesizes itself.
    pub fn none() -> Self {
        Self {
            span: synthesized_span(),
            file: None,
            doc: None,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}..{}", file, self.span.start, self.span.end),
            None => write!(f, "<synthesized>"),
        }
    }
}
