//! Top-level `function` declarations.
//!
//! Functions are declared before main is lowered so calls may precede the
//! definition. Each gets its own procedure; parameters arrive in `R0..Rn`
//! and are spilled into the first locals on entry.

use jacscript_ast::{FunctionDecl, Param, Stmt};
use jacscript_core::{CellKind, CompilationError, OpSync, ValueSpecial};

use crate::program::{Program, RESERVED, Result};
use crate::scope::FunctionCell;

/// Most parameters a function may declare.
pub(crate) const MAX_PARAMS: usize = 8;

impl<'c> Program<'c> {
    /// Reasons `f` cannot be compiled, other than its name.
    fn check_signature(f: &FunctionDecl<'_>) -> Result<()> {
        if f.is_async || f.is_generator {
            return Err(CompilationError::unsupported(
                f.span,
                "async and generator functions are not supported",
            ));
        }
        if f.params.len() > MAX_PARAMS {
            return Err(CompilationError::other(
                f.span,
                format!("too many parameters ({} > {MAX_PARAMS})", f.params.len()),
            ));
        }
        if let Some(Param::Pattern(span)) = f.params.iter().find(|p| matches!(p, Param::Pattern(_)))
        {
            return Err(CompilationError::unsupported(
                *span,
                "only plain identifiers are supported as parameters",
            ));
        }
        Ok(())
    }

    pub(crate) fn declare_functions(&mut self, body: &[Stmt<'_>]) {
        for stmt in body {
            let Stmt::Function(f) = stmt else {
                continue;
            };
            let name = f.name.name;
            let res = if RESERVED.contains(&name) {
                Err(CompilationError::AlreadyDefined {
                    name: name.to_string(),
                    span: f.name.span,
                })
            } else {
                self.check_free(name, f.name.span)
                    .and_then(|()| Self::check_signature(f))
            };
            if let Err(err) = res {
                self.report(err);
                continue;
            }
            let proc = self.add_procedure(name, f.params.len());
            self.function_index
                .insert(name.to_string(), self.functions.len());
            self.functions.push(FunctionCell {
                name: name.to_string(),
                proc,
                num_params: f.params.len(),
                emitted: false,
            });
        }
    }

    /// Lower the body of a declared function. Declarations that failed to
    /// declare, and repeated declarations, are skipped.
    pub(crate) fn emit_function_decl(&mut self, f: &FunctionDecl<'_>) -> Result<()> {
        if Self::check_signature(f).is_err() {
            return Ok(());
        }
        let Some(&index) = self.function_index.get(f.name.name) else {
            return Ok(());
        };
        if self.functions[index].emitted {
            return Ok(());
        }
        self.functions[index].emitted = true;
        let proc = self.functions[index].proc;

        let top_level = std::mem::replace(&mut self.top_level, false);
        let res = self.with_procedure(proc, |p| {
            for (reg, param) in f.params.iter().enumerate() {
                let Param::Ident(id) = param else {
                    continue;
                };
                p.check_free(id.name, id.span)?;
                let idx = p.cur().locals.add(id.name);
                p.wr().emit_store_cell(reg as u8, CellKind::Local, idx, 0);
            }
            p.emit_block(&f.body);
            p.wr()
                .emit_load_cell(0, CellKind::Special, ValueSpecial::Nan as u32, 0);
            let ret = p.wr().ret;
            p.wr().emit_label(ret);
            p.wr().emit_sync(OpSync::Return, 0, 0, 0, 0);
            Ok(())
        });
        self.top_level = top_level;
        res
    }
}
