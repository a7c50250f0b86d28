//! Runtime errors.

use jacscript_core::{ImageError, PanicCode};
use thiserror::Error;

/// Result type alias for VM operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Why a VM call did not complete normally.
///
/// A panic is reported by the call that caused it. Once a panic is latched
/// the VM runs no more script code and later calls return `Ok(())`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("script stopped: {0}")]
    Panic(PanicCode),

    /// A single resume ran past the step budget. The offending fiber is
    /// dropped; the VM keeps running the others.
    #[error("execution timeout in function {function} after {steps} steps")]
    Timeout { function: usize, steps: usize },

    /// The environment failed. Raised while stepping, this also latches an
    /// internal-error panic.
    #[error("environment error: {0}")]
    Host(String),

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl VmError {
    pub fn host(message: impl Into<String>) -> Self {
        VmError::Host(message.into())
    }

    /// Panic code carried by this error, if any.
    pub fn panic_code(&self) -> Option<PanicCode> {
        match self {
            VmError::Panic(code) => Some(*code),
            _ => None,
        }
    }
}
