//! Source positions attached to AST nodes and compile errors.

use std::fmt;

/// A position in script source.
///
/// Lines and columns are 1-indexed. `len` is the byte length of the node
/// the span was taken from and is only used for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
    pub len: u32,
}

impl Span {
    #[inline]
    pub fn new(line: u32, col: u32, len: u32) -> Self {
        Self { line, col, len }
    }

    /// A zero-length span, used for synthesized nodes.
    #[inline]
    pub fn point(line: u32, col: u32) -> Self {
        Self { line, col, len: 0 }
    }

    /// Whether this span carries any position at all.
    ///
    /// Code synthesized by the compiler (dispatchers, auto-refresh loops)
    /// uses `Span::default()`, which has line 0.
    #[inline]
    pub fn is_known(&self) -> bool {
        self.line != 0
    }

    /// Extend this span to end where `other` ends, when both sit on one line.
    #[inline]
    pub fn to(self, other: Span) -> Span {
        if self.line == other.line && other.col >= self.col {
            Span::new(self.line, self.col, other.col + other.len - self.col)
        } else {
            self
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
