//! `var` declarations.
//!
//! Top-level declarations of main are hoisted: every name becomes a global
//! (or a role, for `roles.<service>()` and `condition()` initializers)
//! before any code is emitted, so handlers can refer to names declared
//! further down. Declarations anywhere else introduce locals.

use jacscript_ast::{DeclKind, Expr, Stmt, VarDecl};
use jacscript_core::{CellKind, CompilationError, Span};
use jacscript_registry::{ServiceSpec, builtin};

use crate::program::{MAIN, Program, Result};
use crate::scope::RoleCell;
use crate::value::Value;

impl<'c> Program<'c> {
    /// If `init` constructs a role, the service it names.
    fn role_constructor(&self, init: &Expr<'_>) -> Option<Result<&'c ServiceSpec>> {
        let Expr::Call(call) = init else {
            return None;
        };
        let catalog = self.catalog;
        match call.callee {
            Expr::Member(m) if m.object.as_ident() == Some("roles") => {
                let name = m.member.name;
                Some(catalog.by_name(name).ok_or_else(|| CompilationError::UnknownService {
                    name: name.to_string(),
                    span: m.member.span,
                }))
            }
            Expr::Ident(id) if id.name == "condition" => Some(
                catalog
                    .by_class(builtin::CONDITION)
                    .ok_or_else(|| CompilationError::UnknownService {
                        name: "condition".into(),
                        span: id.span,
                    }),
            ),
            _ => None,
        }
    }

    /// Hoist main's top-level declarations. Roles are numbered in name
    /// order so that the role table does not depend on statement order.
    pub(crate) fn declare_vars(&mut self, body: &[Stmt<'_>]) {
        let mut roles: Vec<(String, &'c ServiceSpec, Span)> = Vec::new();
        for stmt in body {
            let Stmt::Var(decl) = stmt else {
                continue;
            };
            if decl.kind != DeclKind::Var {
                // reported when the statement is lowered
                continue;
            }
            for d in decl.declarators {
                let name = d.name.name;
                let clash = self.check_free(name, d.name.span).and_then(|()| {
                    if roles.iter().any(|(n, ..)| n == name) {
                        Err(CompilationError::AlreadyDefined {
                            name: name.to_string(),
                            span: d.name.span,
                        })
                    } else {
                        Ok(())
                    }
                });
                if let Err(err) = clash {
                    self.report(err);
                    continue;
                }
                match d.init.and_then(|init| self.role_constructor(init)) {
                    Some(Ok(spec)) => roles.push((name.to_string(), spec, d.span)),
                    Some(Err(err)) => self.report(err),
                    None => {
                        self.globals.add(name);
                    }
                }
            }
        }

        roles.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, spec, span) in roles {
            tracing::trace!(%name, service = %spec.name, line = span.line, "role");
            self.role_index.insert(name.clone(), self.roles.len());
            self.roles.push(RoleCell::new(name, spec));
        }
    }

    pub(crate) fn emit_var_decl(&mut self, decl: &VarDecl<'_>) -> Result<()> {
        if decl.kind != DeclKind::Var {
            return Err(CompilationError::unsupported(
                decl.span,
                "only 'var' declarations are supported",
            ));
        }
        for d in decl.declarators {
            let name = d.name.name;
            if let Some(init) = d.init {
                if let Some(ctor) = self.role_constructor(init) {
                    // hoisted by declare_vars(); anywhere else it is misplaced
                    if self.top_level && self.proc == MAIN {
                        continue;
                    }
                    ctor?;
                    return Err(CompilationError::TopLevelOnly {
                        construct: "role declaration".into(),
                        span: d.span,
                    });
                }
            }

            let Some(dst) = self.declare_var(name, d.name.span)? else {
                continue;
            };
            if let Some(init) = d.init {
                let src = self.emit_expr(init)?;
                self.assign(dst, src).map_err(|e| e.or_span(init.span()))?;
            }
        }
        Ok(())
    }

    /// The cell `var name` refers to, creating it if it was not hoisted.
    /// `None` when hoisting already failed and was reported.
    fn declare_var(&mut self, name: &str, span: Span) -> Result<Option<Value<'c>>> {
        let (kind, index) = if self.proc == MAIN && self.top_level {
            match self.globals.lookup(name) {
                Some(index) => (CellKind::Global, index),
                None => return Ok(None),
            }
        } else if self.proc == MAIN {
            self.check_free(name, span)?;
            (CellKind::Global, self.globals.add(name))
        } else {
            self.check_free(name, span)?;
            (CellKind::Local, self.cur().locals.add(name))
        };
        Ok(Some(Value::Cell { kind, index }))
    }
}
