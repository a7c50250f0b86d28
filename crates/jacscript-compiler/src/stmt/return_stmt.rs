//! `return`.

use jacscript_ast::ReturnStmt;

use crate::program::{Program, Result};
use crate::value::Value;

impl<'c> Program<'c> {
    /// Leave the result in R0 and jump to the procedure's exit. A bare
    /// `return` returns NaN.
    pub(crate) fn emit_return(&mut self, s: &ReturnStmt<'_>) -> Result<()> {
        let value = match s.value {
            Some(expr) => {
                let v = self.emit_expr(expr)?;
                if !v.is_number() {
                    return Err(jacscript_core::CompilationError::ValueRequired {
                        span: expr.span(),
                    });
                }
                v
            }
            None => Value::Float(f64::NAN),
        };
        self.wr().push();
        self.wr().alloc_args(1)?;
        self.assign(Value::Reg(0), value)?;
        let ret = self.wr().ret;
        self.wr().emit_jump(ret, None);
        self.wr().pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;
    use jacscript_ast::AstBuilder;
    use jacscript_core::{CompilationError, Instr, OpTop};
    use jacscript_registry::ServiceCatalog;

    use crate::{CompileOptions, compile};

    #[test]
    fn return_jumps_to_exit() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[b.function("f", &[], &[b.ret(Some(b.num(7.0)))])]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success());
        let f: Vec<Instr> = res.functions[1].code.iter().map(|&w| Instr(w)).collect();
        let load = f.iter().position(|i| i.op() == Some(OpTop::LoadCell)).unwrap();
        assert_eq!(f[load].subop(), 0);
        assert_eq!(f[load + 2].op(), Some(OpTop::Jump));
    }

    #[test]
    fn top_level_return_ends_main() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[b.ret(None), b.var("x", Some(b.num(1.0)))]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
    }

    #[test]
    fn cannot_return_a_role() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.function("f", &[], &[b.ret(Some(b.ident("btn")))]),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(matches!(
            &res.errors[..],
            [CompilationError::ValueRequired { .. }]
        ));
    }
}
