//! Core types shared by the Jacscript compiler and virtual machine.
//!
//! This crate holds everything both halves of the toolchain must agree on:
//! the instruction encoding, the binary image layout, error types and
//! source spans. It has no knowledge of the AST or of how a program runs.
//!
//! ## Modules
//!
//! - [`format`] - opcode classes, sub-operations, cell kinds and image constants
//! - [`image`] - image loading, verification and disassembly
//! - [`debug`] - debug side-channel (source maps, display names)
//! - [`error`] - [`CompilationError`] and [`ImageError`]
//! - [`span`] - source positions
//!
//! ## Example
//!
//! ```ignore
//! use jacscript_core::{ImageInfo, disassemble};
//!
//! let image = ImageInfo::load(&bytes)?;
//! println!("{} functions, {} roles", image.functions.len(), image.roles.len());
//! println!("{}", disassemble(&image, None));
//! ```

pub mod debug;
pub mod error;
pub mod format;
pub mod image;
pub mod span;

pub use debug::{CellDebugInfo, DebugInfo, FunctionDebugInfo, SrcMapEntry};
pub use error::{CompilationError, ImageError};
pub use format::{
    BUFFER_REG, CellKind, Instr, NUM_REGS, OpAsync, OpBinary, OpCall, OpFmt,
    OpMath1, OpMath2, OpRoleProperty, OpSync, OpTop, OpUnary, PanicCode, RegMask, ValueSpecial,
};
pub use image::{FunctionInfo, ImageInfo, RoleInfo, disassemble, verify};
pub use span::Span;
