//! Statement lowering.
//!
//! Each statement is lowered inside [`Program::guarded`]: a failing
//! statement reports its error and is skipped, and lowering carries on with
//! the next one. That is what lets a single compile report every error in
//! the script.
//!
//! ## Modules
//!
//! - `var_decl` - `var` declarations, including role declarations
//! - `if_stmt` - `if`/`else`
//! - `return_stmt` - `return`
//! - `function` - top-level `function` declarations

mod function;
mod if_stmt;
mod return_stmt;
mod var_decl;

use jacscript_ast::{Block, Expr, Script, Stmt};
use jacscript_core::{OpSync, Span};

use crate::program::Program;

impl<'c> Program<'c> {
    /// Lower a whole script into main, then generate the dispatchers.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn emit_script(&mut self, script: &Script<'_>) {
        self.declare_functions(script.body);
        self.declare_vars(script.body);

        for stmt in script.body {
            self.top_level = true;
            self.emit_stmt(stmt);
        }
        self.top_level = false;

        let ret = self.wr().ret;
        self.wr().emit_label(ret);
        self.wr().emit_sync(OpSync::Return, 0, 0, 0, 0);

        self.emit_dispatchers();
    }

    pub(crate) fn emit_stmt(&mut self, stmt: &Stmt<'_>) {
        let span = stmt.span();
        let outer = self.wr().current_line();
        self.wr().stmt_start(span.line);

        self.guarded(span, |p| match stmt {
            Stmt::Var(decl) => p.emit_var_decl(decl),
            Stmt::Expr(s) => p.emit_expr(s.expr).map(|_| ()),
            Stmt::If(s) => p.emit_if(s),
            Stmt::Block(block) => {
                p.nested(|p| p.emit_block(block));
                Ok(())
            }
            Stmt::Return(s) => p.emit_return(s),
            Stmt::Function(f) => {
                p.require_top_level("function declaration")?;
                p.emit_function_decl(f)
            }
        });

        // code after a nested statement belongs to the enclosing one
        self.wr().stmt_end(outer);
    }

    pub(crate) fn emit_block(&mut self, block: &Block<'_>) {
        for stmt in block.stmts {
            self.emit_stmt(stmt);
        }
    }

    /// An expression used as a statement, e.g. the body of `() => x.on()`.
    pub(crate) fn emit_expr_stmt(&mut self, expr: &Expr<'_>, span: Span) {
        let outer = self.wr().current_line();
        self.wr().stmt_start(span.line);
        self.guarded(span, |p| p.emit_expr(expr).map(|_| ()));
        self.wr().stmt_end(outer);
    }

    /// Run `f` with the top-level flag cleared.
    pub(crate) fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        let top_level = std::mem::replace(&mut self.top_level, false);
        f(self);
        self.top_level = top_level;
    }
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;
    use jacscript_ast::AstBuilder;
    use jacscript_registry::ServiceCatalog;

    use crate::{CompileOptions, compile};

    #[test]
    fn errors_do_not_stop_later_statements() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.line(1).expr_stmt(b.ident("a")),
            b.line(2).var("x", Some(b.num(1.0))),
            b.line(3).expr_stmt(b.ident("b")),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert_eq!(res.num_errors, 2);
        let lines: Vec<u32> = res.errors.iter().map(|e| e.span().line).collect();
        assert_eq!(lines, vec![1, 3]);
        assert_eq!(res.num_globals, 1);
    }

    #[test]
    fn max_errors_caps_the_list_but_not_the_count() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.expr_stmt(b.ident("a")),
            b.expr_stmt(b.ident("b")),
            b.expr_stmt(b.ident("c")),
        ]);
        let res = compile(
            &script,
            &ServiceCatalog::with_builtins(),
            CompileOptions::new().with_max_errors(2),
        );
        assert_eq!(res.num_errors, 3);
        assert_eq!(res.errors.len(), 2);
        assert!(!res.is_success());
    }

    #[test]
    fn source_map_follows_statements() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.line(1).var("x", Some(b.num(1.0))),
            b.line(5).var("y", Some(b.num(2.0))),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        let debug = res.debug.unwrap();
        let lines: Vec<u32> = debug.functions[0].srcmap.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 5]);
        assert_eq!(debug.functions[0].line_at(0), Some(1));
    }

    #[test]
    fn nested_block_is_not_top_level() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[b.block(&[b.function("f", &[], &[])])]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(matches!(
            &res.errors[..],
            [jacscript_core::CompilationError::TopLevelOnly { .. }]
        ));
    }
}
