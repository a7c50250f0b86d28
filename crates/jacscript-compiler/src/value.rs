//! What an expression lowers to.

use jacscript_core::CellKind;
use jacscript_registry::PacketSpec;

/// The result of lowering an expression.
///
/// Only [`Value::Reg`], [`Value::Cell`] and [`Value::Float`] are numbers.
/// The rest name things that only make sense as the object of a member
/// access or a call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'c> {
    /// A general purpose register holding the value.
    Reg(u8),
    /// The packet buffer, holding a string.
    Buffer,
    /// A local, global or any other loadable cell.
    Cell { kind: CellKind, index: u32 },
    /// A compile-time constant.
    Float(f64),
    Role(usize),
    Register {
        role: usize,
        packet: &'c PacketSpec,
    },
    Event {
        role: usize,
        packet: &'c PacketSpec,
    },
    Command {
        role: usize,
        packet: &'c PacketSpec,
    },
    /// A multi-field register read whose fields are still in the buffer.
    ValueSeq {
        role: usize,
        packet: &'c PacketSpec,
    },
    Function(usize),
}

impl Value<'_> {
    /// Whether this can be stored or computed with.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Reg(_) | Value::Cell { .. } | Value::Float(_))
    }

    /// Whether this names a variable that can be assigned.
    pub fn is_variable(&self) -> bool {
        matches!(
            self,
            Value::Cell {
                kind: CellKind::Local | CellKind::Global,
                ..
            }
        )
    }

    /// Short description for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Value::Reg(_) | Value::Cell { .. } | Value::Float(_) => "a number",
            Value::Buffer => "a string",
            Value::Role(_) => "a role",
            Value::Register { .. } => "a register",
            Value::Event { .. } => "an event",
            Value::Command { .. } => "a command",
            Value::ValueSeq { .. } => "a multi-field value",
            Value::Function(_) => "a function",
        }
    }
}

/// Truthiness of a number, as tested by conditional jumps.
#[inline]
pub fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}
