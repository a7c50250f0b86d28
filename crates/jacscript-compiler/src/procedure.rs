//! A function body being compiled.

use crate::emit::OpWriter;
use crate::scope::VariableScope;

/// One entry of the function table: main, a user function, a handler, a
/// dispatcher or the auto-refresh loop.
#[derive(Debug)]
pub struct Procedure {
    pub name: String,
    pub num_params: usize,
    pub locals: VariableScope,
    pub writer: OpWriter,
}

impl Procedure {
    pub fn new(name: impl Into<String>, num_params: usize) -> Self {
        Self {
            name: name.into(),
            num_params,
            locals: VariableScope::new(),
            writer: OpWriter::new(),
        }
    }
}
