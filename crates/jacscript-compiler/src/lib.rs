//! Jacscript Compiler
//!
//! Lowers a Jacscript AST into a binary image for the Jacscript VM.
//!
//! ## Architecture
//!
//! - **Declaration**: top-level functions, globals and roles are hoisted so
//!   that handlers and functions may refer to names declared further down
//! - **Lowering**: main, every function body and every handler is lowered
//!   statement by statement into its own procedure; errors are collected
//!   rather than aborting the compile
//! - **Dispatch**: subscriptions recorded while lowering become one
//!   dispatcher procedure per role, plus an auto-refresh loop for registers
//!   watched with `onChange`
//! - **Serialization**: jumps are patched and the procedures, literals and
//!   role table are laid out into the image
//!
//! ## Modules
//!
//! - `emit`: per-procedure instruction writer, labels and register allocation
//! - `expr`: expression lowering, builtins and role members
//! - `stmt`: statement lowering and declarations
//! - `dispatch`: role dispatchers and auto-refresh
//! - `serialize`: image layout and debug info
//! - `scope`: variable, role and function tables
//!
//! ## Example
//!
//! ```ignore
//! use jacscript_compiler::{CompileOptions, compile};
//! use jacscript_registry::ServiceCatalog;
//!
//! let result = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
//! for err in &result.errors {
//!     eprintln!("line {}: {err}", err.span().line);
//! }
//! ```

mod dispatch;
mod emit;
mod expr;
mod options;
mod procedure;
mod program;
mod scope;
mod serialize;
mod stmt;
mod value;

pub use options::CompileOptions;

// Re-export CompilationError from core for convenience
pub use jacscript_core::CompilationError;

use jacscript_ast::Script;
use jacscript_core::DebugInfo;
use jacscript_registry::ServiceCatalog;

use program::Program;

/// A compiled procedure, kept next to the image for inspection and tests.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    /// Patched instruction words.
    pub code: Vec<u16>,
    pub num_locals: usize,
    /// Most registers saved across a suspension at once.
    pub num_regs: u8,
    pub num_params: usize,
    /// Instruction offsets of every bound label.
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRole {
    pub name: String,
    pub class_identifier: u32,
}

/// Result of compilation.
#[derive(Debug)]
pub struct CompilationResult {
    /// The serialized image. A compile with errors still produces one, but
    /// it must not be run.
    pub image: Vec<u8>,
    pub debug: Option<DebugInfo>,
    /// Every procedure in image order; main is always first.
    pub functions: Vec<CompiledFunction>,
    pub roles: Vec<CompiledRole>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub num_globals: usize,
    /// Recorded errors, at most [`CompileOptions::max_errors`] of them.
    pub errors: Vec<CompilationError>,
    /// Total number of errors, recorded or not.
    pub num_errors: usize,
}

impl CompilationResult {
    /// Check if compilation succeeded (no errors).
    pub fn is_success(&self) -> bool {
        self.num_errors == 0
    }
}

/// Compile `script` against the services in `catalog`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn compile(
    script: &Script<'_>,
    catalog: &ServiceCatalog,
    options: CompileOptions,
) -> CompilationResult {
    let mut program = Program::new(catalog, options);
    program.emit_script(script);
    program.finish()
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;
    use jacscript_ast::AstBuilder;
    use jacscript_core::format::Params;
    use jacscript_core::{ImageInfo, Instr, OpAsync, OpCall, OpSync, OpTop, disassemble};
    use jacscript_registry::builtin;

    use super::*;

    fn decode(code: &[u16]) -> Vec<(Instr, Params)> {
        let mut out = Vec::new();
        let mut p = Params::default();
        for &w in code {
            let i = Instr(w);
            if p.absorb(i) {
                continue;
            }
            out.push((i, p.resolve(i)));
            p = Params::default();
        }
        out
    }

    #[test]
    fn button_subscription_gets_a_dispatcher() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.line(1).var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.line(2).var("led", Some(b.call(b.path("roles.led"), &[]))),
            b.line(3).expr_stmt(b.call(
                b.path("btn.pressed.sub"),
                &[b.arrow(&[], &[b.line(3).expr_stmt(b.call(b.path("led.on"), &[]))])],
            )),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        assert_eq!(res.roles.len(), 2);
        assert_eq!(res.roles[0].class_identifier, builtin::BUTTON);

        let disp = res.functions.iter().find(|f| f.name == "btn_disp").unwrap();
        let code = decode(&disp.code);
        let observe = code
            .iter()
            .position(|(i, _)| i.op() == Some(OpTop::Sync) && i.arg8() == OpSync::ObserveRole as u16)
            .unwrap();
        let call = code
            .iter()
            .position(|(i, _)| {
                i.op() == Some(OpTop::Call) && (i.arg8() >> 6) as u8 == OpCall::BgMax1Pend1 as u8
            })
            .unwrap();
        assert!(observe < call);
        // the call is guarded by a conditional jump
        assert!(
            code[observe..call]
                .iter()
                .any(|(i, _)| i.op() == Some(OpTop::Jump) && i.jump_if_zero())
        );

        let handler = res.functions.iter().find(|f| f.name == "btn_pressed").unwrap();
        let sends: Vec<u32> = decode(&handler.code)
            .iter()
            .filter(|(i, _)| i.op() == Some(OpTop::Async) && i.arg8() == OpAsync::SendCmd as u16)
            .map(|(_, p)| p.b)
            .collect();
        assert_eq!(sends, vec![0x80]);
    }

    #[test]
    fn expression_arrow_assigns_a_null_global() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.var("last", Some(b.null())),
            b.expr_stmt(b.call(
                b.path("btn.pressed.sub"),
                &[b.arrow_expr(&[], b.assign(b.ident("last"), b.num(1.0)))],
            )),
        ]);
        let options = CompileOptions::new().with_verify(false);
        let res = compile(&script, &ServiceCatalog::with_builtins(), options);
        assert!(res.is_success(), "{:?}", res.errors);
        assert_eq!(res.num_globals, 1);
        assert!(res.functions.iter().any(|f| f.name == "btn_pressed"));
    }

    #[test]
    fn failed_compile_reports_unknown_names() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[b.expr_stmt(b.call(b.path("nobody.on"), &[]))]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(!res.is_success());
        assert!(ImageInfo::load(&res.image).is_ok());
        assert!(matches!(
            &res.errors[..],
            [CompilationError::UnknownName { name, .. }] if name == "nobody"
        ));
    }

    #[test]
    fn every_label_lies_inside_its_function() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.var("n", Some(b.num(0.0))),
            b.expr_stmt(b.call(b.path("btn.pressed.sub"), &[b.arrow(&[], &[])])),
            b.expr_stmt(b.call(b.path("btn.onDisconnected"), &[b.arrow(&[], &[])])),
            b.if_(
                b.ident("n"),
                b.expr_stmt(b.call(b.ident("wait"), &[b.num(0.5)])),
                Some(b.ret(None)),
            ),
            b.expr_stmt(b.call(
                b.ident("every"),
                &[b.num(0.1), b.arrow(&[], &[b.expr_stmt(b.assign(b.ident("n"), b.num(1.0)))])],
            )),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        for f in &res.functions {
            for &l in &f.labels {
                assert!(l < f.code.len(), "{}: label at {l} of {}", f.name, f.code.len());
            }
        }
    }

    #[test]
    fn image_disassembles_with_names() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.expr_stmt(b.call(b.path("btn.pressed.wait"), &[])),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        let image = ImageInfo::load(&res.image).unwrap();
        let text = disassemble(&image, res.debug.as_ref());
        assert!(text.contains("main"), "{text}");
        assert!(text.contains("btn"), "{text}");
    }
}
