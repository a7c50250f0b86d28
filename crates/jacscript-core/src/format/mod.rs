//! Instruction set and binary image constants.
//!
//! Every instruction is a 16-bit word whose top nibble selects an
//! [`OpTop`] class. Operands too wide for the inline fields are carried by
//! `SET_A`..`SET_D`/`SET_HIGH` prefix words emitted immediately before the
//! consuming instruction; the interpreter accumulates them and clears them
//! after every non-prefix word.
//!
//! ```text
//! SET_A..SET_D  ARG[12]
//! SET_HIGH      A/B/C/D[2] ARG[10]        params[x] |= ARG << 12
//! UNARY         OP[4] DST[4] SRC[4]
//! BINARY        OP[4] DST[4] SRC[4]       dst = dst op src
//! LOAD_CELL     DST[4] A:KIND[2] B:IDX[6]
//! STORE_CELL    SRC[4] A:KIND[2] B:IDX[6]
//! JUMP          REG[4] BACK[1] IF_ZERO[1] B:OFF[6]
//! CALL          NUMARGS[4] OPCALL[2] B:FUNIDX[6]   D = saved registers
//! SYNC          A:ARG[4] OP[8]
//! ASYNC         D:SAVE_REGS[4] OP[8]
//! ```
//!
//! ## Modules
//!
//! - `opcode` - the closed enums for classes and sub-operations
//! - `instr` - field extraction from a raw instruction word
//! - `numfmt` - wire codecs for packet buffer fields

mod instr;
mod numfmt;
mod opcode;

use bitflags::bitflags;

pub use instr::{Instr, Params};
pub use numfmt::{js_round, shift_scale};
pub use opcode::{
    CellKind, OpAsync, OpBinary, OpCall, OpFmt, OpMath1, OpMath2, OpRoleProperty, OpSync, OpTop,
    OpUnary, ValueSpecial,
};

/// Number of general purpose registers.
pub const NUM_REGS: usize = 16;

/// Pseudo-register the compiler reserves while the packet buffer is being
/// filled. It never appears in an instruction.
pub const BUFFER_REG: u8 = NUM_REGS as u8 + 1;

/// Largest payload carried by one packet.
pub const MAX_PAYLOAD_SIZE: usize = 236;

// ============================================================================
// Image layout
// ============================================================================

pub const MAGIC0: u32 = 0x5363_614a;
pub const MAGIC1: u32 = 0x9a6a_7e0a;

/// Size of the fixed header: both magics, the global count, zero padding.
pub const FIX_HEADER_SIZE: usize = 64;
/// One `(u32 offset, u32 length)` section descriptor.
pub const SECTION_HEADER_SIZE: usize = 8;
pub const FUNCTION_HEADER_SIZE: usize = 16;
pub const ROLE_HEADER_SIZE: usize = 8;
pub const STRING_HEADER_SIZE: usize = 8;

/// The six image sections, in on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    FunctionDesc,
    FunctionCode,
    FloatLiterals,
    Roles,
    StringDesc,
    StringData,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::FunctionDesc,
        Section::FunctionCode,
        Section::FloatLiterals,
        Section::Roles,
        Section::StringDesc,
        Section::StringData,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Section::FunctionDesc => "function-desc",
            Section::FunctionCode => "function-code",
            Section::FloatLiterals => "float-literals",
            Section::Roles => "roles",
            Section::StringDesc => "string-desc",
            Section::StringData => "string-data",
        }
    }

    /// Byte offset of this section's descriptor within the image.
    pub fn header_offset(self) -> usize {
        FIX_HEADER_SIZE + SECTION_HEADER_SIZE * self as usize
    }

    /// Size of one record, for sections made of fixed-size records.
    pub fn record_size(self) -> Option<usize> {
        match self {
            Section::FunctionDesc => Some(FUNCTION_HEADER_SIZE),
            Section::FunctionCode => None,
            Section::FloatLiterals => Some(8),
            Section::Roles => Some(ROLE_HEADER_SIZE),
            Section::StringDesc => Some(STRING_HEADER_SIZE),
            Section::StringData => None,
        }
    }
}

/// Offset of the first section, right after the descriptor table.
pub const SECTIONS_START: usize = FIX_HEADER_SIZE + SECTION_HEADER_SIZE * Section::ALL.len();

// ============================================================================
// Bus constants
// ============================================================================

/// Command bit pattern for a register read.
pub const CMD_GET_REG: u16 = 0x1000;
/// Command bit pattern for a register write.
pub const CMD_SET_REG: u16 = 0x2000;
pub const CMD_TYPE_MASK: u16 = 0xf000;
pub const CMD_REG_MASK: u16 = 0x0fff;
/// Reports with this bit set are events.
pub const CMD_EVENT_MASK: u16 = 0x8000;
pub const CMD_EVENT_CODE_MASK: u16 = 0x00ff;

/// Register codes every service shares.
pub mod system_reg {
    /// Primary sensor value.
    pub const READING: u16 = 0x101;
    /// Number of readings a sensor should stream without being asked.
    pub const STREAMING_SAMPLES: u16 = 0x03;
}

/// Get code paired with a set code (and vice versa for get codes).
#[inline]
pub fn paired_get_code(code: u16) -> u16 {
    (code & !CMD_SET_REG) | CMD_GET_REG
}

// ============================================================================
// Register masks
// ============================================================================

bitflags! {
    /// A set of registers, one bit per register index.
    ///
    /// Bits 0..16 are the general purpose registers; [`RegMask::BUFFER`]
    /// tracks the packet buffer pseudo-register during compilation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegMask: u32 {
        const BUFFER = 1 << BUFFER_REG;
        const _ = !0;
    }
}

impl RegMask {
    #[inline]
    pub fn reg(index: u8) -> Self {
        RegMask::from_bits_retain(1 << index)
    }

    #[inline]
    pub fn has(self, index: u8) -> bool {
        self.bits() & (1 << index) != 0
    }

    /// The general purpose registers only, as encoded in the `D` operand.
    #[inline]
    pub fn general(self) -> u16 {
        (self.bits() & 0xffff) as u16
    }

    /// Register indices in ascending order.
    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0..NUM_REGS as u8).filter(move |&i| self.has(i))
    }
}

// ============================================================================
// Panic codes
// ============================================================================

pub const RESTART_PANIC_CODE: u32 = 0x10_0000;
pub const INTERNAL_ERROR_PANIC_CODE: u32 = 0x10_0001;

/// Why the VM stopped running script code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanicCode {
    /// `reboot()` or `panic(0)`.
    Restart,
    /// The VM hit something a verified image cannot produce.
    Internal,
    /// `panic(code)` from the script.
    User(u32),
}

impl PanicCode {
    /// Map the operand of a `PANIC` instruction.
    pub fn from_script(code: u32) -> Self {
        match code {
            0 | RESTART_PANIC_CODE => PanicCode::Restart,
            INTERNAL_ERROR_PANIC_CODE => PanicCode::Internal,
            code => PanicCode::User(code),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            PanicCode::Restart => RESTART_PANIC_CODE,
            PanicCode::Internal => INTERNAL_ERROR_PANIC_CODE,
            PanicCode::User(code) => code,
        }
    }
}

impl std::fmt::Display for PanicCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanicCode::Restart => write!(f, "restart requested"),
            PanicCode::Internal => write!(f, "internal error"),
            PanicCode::User(code) => write!(f, "panic {code}"),
        }
    }
}
