//! Error types for compiling and loading Jacscript programs.
//!
//! ## Error Hierarchy
//!
//! ```text
//! CompilationError - user-facing problems found while lowering a script
//! ImageError       - malformed or inconsistent binary images
//! ```
//!
//! Runtime failures live with the VM (`jacscript::VmError`). Internal
//! compiler defects such as an unpatched label are not represented here;
//! they abort with a panic because no user input can cause them.

use thiserror::Error;

use crate::Span;

// ============================================================================
// Compilation Errors
// ============================================================================

/// A problem in the script being compiled.
///
/// The compiler keeps going after one of these is reported, so a single run
/// can surface several of them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompilationError {
    /// An identifier that resolves to nothing.
    #[error("at {span}: cannot find '{name}'")]
    UnknownName { name: String, span: Span },

    /// A declaration that clashes with a visible role, variable or function.
    #[error("at {span}: name '{name}' already defined")]
    AlreadyDefined { name: String, span: Span },

    /// `roles.foo()` where no service named `foo` is known.
    #[error("at {span}: no such service '{name}'")]
    UnknownService { name: String, span: Span },

    /// A member access on a role, register or event that does not exist.
    #[error("at {span}: '{member}' is not a member of {object}")]
    UnknownMember {
        object: String,
        member: String,
        span: Span,
    },

    /// A call with the wrong number of arguments.
    #[error("at {span}: {name} expects {expected} argument(s), got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },

    /// A numeric value was expected but something else (a buffer, a role,
    /// a function) was given.
    #[error("at {span}: a number required here")]
    ValueRequired { span: Span },

    /// An assignment target that is not a variable.
    #[error("at {span}: expecting variable")]
    ExpectedVariable { span: Span },

    /// A compile-time constant was required.
    #[error("at {span}: expecting a literal here")]
    LiteralRequired { span: Span },

    /// All sixteen registers are live.
    #[error("at {span}: expression too complex")]
    ExpressionTooComplex { span: Span },

    /// A second string/buffer was needed while the buffer register is live.
    #[error("at {span}: buffer already in use")]
    BufferInUse { span: Span },

    /// `panic()` with a code outside `1..=9999`.
    #[error("at {span}: panic() code must be integer between 1 and 9999")]
    InvalidPanicCode { span: Span },

    /// A construct that may only appear as a top-level statement.
    #[error("at {span}: {construct} only allowed at top level")]
    TopLevelOnly { construct: String, span: Span },

    /// A valid construct used in a way the language does not support.
    #[error("at {span}: {message}")]
    Unsupported { message: String, span: Span },

    /// Anything else; the message is shown as-is.
    #[error("at {span}: {message}")]
    Other { message: String, span: Span },
}

impl CompilationError {
    /// Where this error was reported.
    pub fn span(&self) -> Span {
        match self {
            CompilationError::UnknownName { span, .. }
            | CompilationError::AlreadyDefined { span, .. }
            | CompilationError::UnknownService { span, .. }
            | CompilationError::UnknownMember { span, .. }
            | CompilationError::ArgumentCount { span, .. }
            | CompilationError::ValueRequired { span }
            | CompilationError::ExpectedVariable { span }
            | CompilationError::LiteralRequired { span }
            | CompilationError::ExpressionTooComplex { span }
            | CompilationError::BufferInUse { span }
            | CompilationError::InvalidPanicCode { span }
            | CompilationError::TopLevelOnly { span, .. }
            | CompilationError::Unsupported { span, .. }
            | CompilationError::Other { span, .. } => *span,
        }
    }

    fn span_mut(&mut self) -> &mut Span {
        match self {
            CompilationError::UnknownName { span, .. }
            | CompilationError::AlreadyDefined { span, .. }
            | CompilationError::UnknownService { span, .. }
            | CompilationError::UnknownMember { span, .. }
            | CompilationError::ArgumentCount { span, .. }
            | CompilationError::ValueRequired { span }
            | CompilationError::ExpectedVariable { span }
            | CompilationError::LiteralRequired { span }
            | CompilationError::ExpressionTooComplex { span }
            | CompilationError::BufferInUse { span }
            | CompilationError::InvalidPanicCode { span }
            | CompilationError::TopLevelOnly { span, .. }
            | CompilationError::Unsupported { span, .. }
            | CompilationError::Other { span, .. } => span,
        }
    }

    /// Attach `span` if the error was raised without a position.
    pub fn or_span(mut self, span: Span) -> Self {
        if !self.span().is_known() {
            *self.span_mut() = span;
        }
        self
    }

    /// Shorthand for [`CompilationError::Other`].
    pub fn other(span: Span, message: impl Into<String>) -> Self {
        CompilationError::Other {
            message: message.into(),
            span,
        }
    }

    /// Shorthand for [`CompilationError::Unsupported`].
    pub fn unsupported(span: Span, message: impl Into<String>) -> Self {
        CompilationError::Unsupported {
            message: message.into(),
            span,
        }
    }
}

// ============================================================================
// Image Errors
// ============================================================================

/// A binary image that cannot be loaded or fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad magic: {magic0:#010x} {magic1:#010x}")]
    BadMagic { magic0: u32, magic1: u32 },

    #[error("section {section} at {offset:#x} is not 4-byte aligned")]
    Misaligned { section: &'static str, offset: u32 },

    #[error("section {section} ({offset:#x}+{len}) lies outside the image")]
    SectionOutOfBounds {
        section: &'static str,
        offset: u32,
        len: u32,
    },

    #[error("section {section} does not follow the previous section")]
    SectionOrder { section: &'static str },

    #[error("section {section} length {len} is not a multiple of {record}")]
    RecordSize {
        section: &'static str,
        len: u32,
        record: u32,
    },

    #[error("function {index}: {message}")]
    BadFunction { index: usize, message: String },

    #[error("string {index}: {message}")]
    BadString { index: usize, message: String },

    #[error("function {function} at pc {pc}: {message}")]
    BadInstruction {
        function: usize,
        pc: usize,
        message: String,
    },
}

// ============================================================================
// Tests
// ============================================================================
