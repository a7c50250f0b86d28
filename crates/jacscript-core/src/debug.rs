//! Debug side-channel produced next to an image.
//!
//! Nothing here is needed to run a program. The disassembler and the VM's
//! log messages use it to print names instead of indices.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Display name of a role, global or local.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellDebugInfo {
    pub name: String,
}

/// One run of instructions produced by a single source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SrcMapEntry {
    pub line: u32,
    /// First instruction, in halfwords from the start of the function.
    pub start: u32,
    /// Number of instructions.
    pub len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FunctionDebugInfo {
    pub name: String,
    pub srcmap: Vec<SrcMapEntry>,
    pub locals: Vec<CellDebugInfo>,
}

impl FunctionDebugInfo {
    /// Source line of the instruction at `pc` (relative to the function).
    pub fn line_at(&self, pc: u32) -> Option<u32> {
        self.srcmap
            .iter()
            .find(|e| pc >= e.start && pc < e.start + e.len)
            .map(|e| e.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DebugInfo {
    pub functions: Vec<FunctionDebugInfo>,
    pub roles: Vec<CellDebugInfo>,
    pub globals: Vec<CellDebugInfo>,
}

impl DebugInfo {
    pub fn function_name(&self, index: usize) -> Option<&str> {
        self.functions.get(index).map(|f| f.name.as_str())
    }

    pub fn role_name(&self, index: usize) -> Option<&str> {
        self.roles.get(index).map(|r| r.name.as_str())
    }

    pub fn global_name(&self, index: usize) -> Option<&str> {
        self.globals.get(index).map(|g| g.name.as_str())
    }
}
