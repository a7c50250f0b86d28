//! Compiler configuration.

/// Options for [`crate::compile`].
///
/// ```
/// use jacscript_compiler::CompileOptions;
///
/// let opts = CompileOptions::new().with_debug_info(false).with_max_errors(10);
/// assert!(opts.verify);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Produce [`jacscript_core::DebugInfo`] next to the image.
    pub debug_info: bool,
    /// Load and verify the serialized image of an error-free compile.
    pub verify: bool,
    /// Stop recording errors after this many (0 = unlimited). Errors past the
    /// limit are still counted.
    pub max_errors: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            debug_info: true,
            verify: true,
            max_errors: 0,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    pub fn with_verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }
}
