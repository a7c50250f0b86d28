//! `if`/`else`.
//!
//! ```text
//!     [condition -> r]
//!     JUMP else IF_ZERO r
//!     [then]
//!     JUMP end
//! else:
//!     [else]
//! end:
//! ```
//!
//! A literal condition selects its branch at compile time.

use jacscript_ast::{Expr, IfStmt, LiteralKind};

use crate::program::{Program, Result};
use crate::value::truthy;

/// Truthiness of a literal condition.
fn constant_condition(cond: &Expr<'_>) -> Option<bool> {
    match cond {
        Expr::Literal(lit) => match lit.kind {
            LiteralKind::Number(v) => Some(truthy(v)),
            LiteralKind::Bool(b) => Some(b),
            LiteralKind::Null => Some(false),
            LiteralKind::String(s) => Some(!s.is_empty()),
        },
        _ => None,
    }
}

impl<'c> Program<'c> {
    pub(crate) fn emit_if(&mut self, s: &IfStmt<'_>) -> Result<()> {
        if let Some(taken) = constant_condition(s.condition) {
            self.nested(|p| match (taken, s.else_stmt) {
                (true, _) => p.emit_stmt(s.then_stmt),
                (false, Some(else_stmt)) => p.emit_stmt(else_stmt),
                (false, None) => {}
            });
            return Ok(());
        }

        let else_label = self.wr().mk_label("else");
        self.wr().push();
        let cond = self.emit_simple_value(s.condition)?;
        self.wr().emit_jump(else_label, Some(cond));
        self.wr().pop();

        self.nested(|p| p.emit_stmt(s.then_stmt));
        match s.else_stmt {
            Some(else_stmt) => {
                let end = self.wr().mk_label("endif");
                self.wr().emit_jump(end, None);
                self.wr().emit_label(else_label);
                self.nested(|p| p.emit_stmt(else_stmt));
                self.wr().emit_label(end);
            }
            None => self.wr().emit_label(else_label),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;
    use jacscript_ast::{AstBuilder, BinaryOp};
    use jacscript_core::{Instr, OpTop};
    use jacscript_registry::ServiceCatalog;

    use crate::{CompileOptions, compile};

    fn jumps(code: &[u16]) -> Vec<Instr> {
        code.iter()
            .map(|&w| Instr(w))
            .filter(|i| i.op() == Some(OpTop::Jump))
            .collect()
    }

    #[test]
    fn if_else_emits_two_jumps() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("x", Some(b.num(1.0))),
            b.if_(
                b.binary(b.ident("x"), BinaryOp::Less, b.num(2.0)),
                b.expr_stmt(b.assign(b.ident("x"), b.num(5.0))),
                Some(b.expr_stmt(b.assign(b.ident("x"), b.num(6.0)))),
            ),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        let js = jumps(&res.functions[0].code);
        assert_eq!(js.len(), 2);
        assert!(js[0].jump_if_zero());
        assert!(!js[1].jump_if_zero());
        assert!(!js[0].jump_back() && !js[1].jump_back());
    }

    #[test]
    fn literal_condition_folds() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("x", Some(b.num(1.0))),
            b.if_(
                b.bool(false),
                b.expr_stmt(b.assign(b.ident("x"), b.num(5.0))),
                Some(b.expr_stmt(b.assign(b.ident("x"), b.num(6.0)))),
            ),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success());
        assert!(jumps(&res.functions[0].code).is_empty());
        // only the else branch survives
        let loads: Vec<u16> = res.functions[0]
            .code
            .iter()
            .map(|&w| Instr(w))
            .filter(|i| i.op() == Some(OpTop::LoadCell))
            .map(|i| i.arg6())
            .collect();
        assert_eq!(loads, vec![1, 6]);
    }

    #[test]
    fn errors_in_a_branch_keep_labels_consistent() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("x", Some(b.num(1.0))),
            b.if_(
                b.ident("x"),
                b.expr_stmt(b.ident("missing")),
                None,
            ),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert_eq!(res.num_errors, 1);
    }
}
