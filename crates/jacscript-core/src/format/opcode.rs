//! Opcode classes and sub-operations.
//!
//! The numeric values are part of the image format and must not change.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Instruction class, stored in the top four bits of every instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpTop {
    SetA = 0,
    SetB = 1,
    SetC = 2,
    SetD = 3,
    SetHigh = 4,
    Unary = 5,
    Binary = 6,
    LoadCell = 7,
    StoreCell = 8,
    Jump = 9,
    Call = 10,
    Sync = 11,
    Async = 12,
}

impl OpTop {
    /// Prefix classes only feed operands to the next instruction.
    #[inline]
    pub fn is_prefix(self) -> bool {
        (self as u8) <= OpTop::SetHigh as u8
    }
}

/// Operations that may suspend the current fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpAsync {
    /// A = milliseconds; zero waits until the bus wakes the fiber.
    Yield = 0,
    /// A = number of registers to upload; the label is in the buffer.
    CloudUpload = 1,
    /// A = role, B = register code, C = cache validity in ms (0 = default).
    QueryReg = 2,
    /// A = role, B = command code; the payload is in the buffer.
    SendCmd = 3,
}

/// Operations that complete without suspending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpSync {
    Return = 0,
    /// A = size in bytes.
    SetupBuffer = 1,
    /// A = role.
    ObserveRole = 2,
    /// A = string, B = number of arguments, C = buffer offset.
    Format = 3,
    /// A = string, C = buffer offset.
    Memcpy = 4,
    /// A = string, B = number of arguments.
    LogFormat = 5,
    /// A = [`OpMath1`]; operand and result in R0.
    Math1 = 6,
    /// A = [`OpMath2`]; operands in R0 and R1, result in R0.
    Math2 = 7,
    /// A = panic code.
    Panic = 8,
}

/// How a `CALL` starts its callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCall {
    /// Push an activation on the current fiber.
    Sync = 0,
    /// Always start a new fiber.
    Bg = 1,
    /// Start a fiber unless one is already running this function.
    BgMax1 = 2,
    /// Like `BgMax1`, but a busy instance restarts once it finishes.
    BgMax1Pend1 = 3,
}

/// Storage addressed by `LOAD_CELL`/`STORE_CELL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CellKind {
    Local = 0,
    Global = 1,
    FloatConst = 2,
    /// The index itself is the value.
    Identity = 3,
    /// Index = `shift << 4 | fmt`, C = byte offset into the packet.
    Buffer = 4,
    Special = 5,
    /// Index = role, C = [`OpRoleProperty`].
    RoleProperty = 6,
}

/// Values loaded through [`CellKind::Special`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ValueSpecial {
    Nan = 0,
    /// Payload size of the current packet.
    Size = 1,
    /// Event code of the current packet, NaN if it is not an event.
    EvCode = 2,
    /// Register code of the current packet, NaN unless it is a get report.
    RegGetCode = 3,
    /// Index of the role that woke the fiber, NaN otherwise.
    RoleId = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpBinary {
    Add = 1,
    Sub = 2,
    Div = 3,
    Mul = 4,
    Lt = 5,
    Le = 6,
    Eq = 7,
    Ne = 8,
    /// `a ? b : a`
    And = 9,
    /// `a ? a : b`
    Or = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpUnary {
    Id = 0,
    Neg = 1,
    Not = 2,
    Abs = 3,
    IsNan = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpMath1 {
    Floor = 0,
    Round = 1,
    Ceil = 2,
    LogE = 3,
    /// A uniformly random value in `[0, a)`.
    Random = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpMath2 {
    Min = 0,
    Max = 1,
    Pow = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpRoleProperty {
    IsConnected = 0,
}

/// Wire format of a packet buffer field.
///
/// The low two bits give the width (`8 << (fmt & 3)` bits), bit 2 marks
/// signed integers and bit 3 marks floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpFmt {
    U8 = 0b0000,
    U16 = 0b0001,
    U32 = 0b0010,
    U64 = 0b0011,
    I8 = 0b0100,
    I16 = 0b0101,
    I32 = 0b0110,
    I64 = 0b0111,
    F32 = 0b1010,
    F64 = 0b1011,
}

impl OpFmt {
    #[inline]
    pub fn bit_size(self) -> u32 {
        8 << (self as u8 & 3)
    }

    #[inline]
    pub fn byte_size(self) -> usize {
        1 << (self as u8 & 3)
    }

    #[inline]
    pub fn is_float(self) -> bool {
        self as u8 & 0b1000 != 0
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        self as u8 & 0b0100 != 0
    }

    /// Integer format for a field of `bytes` bytes.
    pub fn int(bytes: usize, signed: bool) -> Option<OpFmt> {
        let width = match bytes {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => return None,
        };
        OpFmt::try_from(width | if signed { 0b0100 } else { 0 }).ok()
    }

    /// Float format for a field of `bytes` bytes.
    pub fn float(bytes: usize) -> Option<OpFmt> {
        match bytes {
            4 => Some(OpFmt::F32),
            8 => Some(OpFmt::F64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_classes() {
        assert!(OpTop::SetD.is_prefix());
        assert!(OpTop::SetHigh.is_prefix());
        assert!(!OpTop::Unary.is_prefix());
        assert!(OpTop::try_from(13u8).is_err());
    }

    #[test]
    fn fmt_sizes() {
        assert_eq!(OpFmt::U8.bit_size(), 8);
        assert_eq!(OpFmt::I32.bit_size(), 32);
        assert_eq!(OpFmt::F32.bit_size(), 32);
        assert_eq!(OpFmt::F64.byte_size(), 8);
        assert!(OpFmt::I16.is_signed());
        assert!(!OpFmt::F64.is_signed());
    }

    #[test]
    fn fmt_from_storage() {
        assert_eq!(OpFmt::int(4, true), Some(OpFmt::I32));
        assert_eq!(OpFmt::int(2, false), Some(OpFmt::U16));
        assert_eq!(OpFmt::int(3, false), None);
        assert_eq!(OpFmt::float(4), Some(OpFmt::F32));
    }
}
