//! Jacscript
//!
//! A compiler and virtual machine for Jacscript, a small JavaScript subset
//! for scripting devices on a packet bus. Programs declare roles (typed
//! slots for services such as buttons or LEDs), subscribe to their events
//! and read or write their registers; the VM binds roles to devices found
//! on the bus and runs the program in cooperative fibers.
//!
//! ## Architecture
//!
//! - `jacscript-ast`: syntax tree and builder
//! - `jacscript-registry`: service catalog used to resolve role members
//! - `jacscript-compiler`: AST to binary image
//! - `jacscript-core`: instruction set, image loader, verifier, disassembler
//! - this crate: the VM, its host interface and a runner
//!
//! ## Example
//!
//! ```ignore
//! use jacscript::{CompileOptions, Runner, RunnerConfig, VmConfig, compile};
//! use jacscript_registry::ServiceCatalog;
//!
//! let result = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
//! let mut runner = Runner::new(&result.image, env, VmConfig::new(), RunnerConfig::new())?;
//! runner.poll()?;
//! ```

mod config;
mod env;
mod error;
mod packet;
mod runner;
mod vm;

pub use config::{RunnerConfig, VmConfig};
pub use env::{DeviceInfo, Environment};
pub use error::{Result, VmError};
pub use packet::{DeviceId, Packet};
pub use runner::{Runner, RunnerState};
pub use vm::{Binding, Vm};

pub use jacscript_compiler::{CompilationResult, CompileOptions, compile};
pub use jacscript_core::PanicCode;
