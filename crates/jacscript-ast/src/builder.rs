//! Arena-backed construction of syntax trees.
//!
//! Every node gets a point span on the builder's current line, which starts
//! at 1 and is moved with [`AstBuilder::line`]. That is enough for source
//! maps and error positions in programs assembled without a parser.

use std::cell::Cell;

use bumpalo::Bump;
use jacscript_core::Span;

use crate::expr::*;
use crate::ops::{BinaryOp, UnaryOp};
use crate::stmt::*;

pub struct AstBuilder<'ast> {
    arena: &'ast Bump,
    line: Cell<u32>,
}

impl<'ast> AstBuilder<'ast> {
    pub fn new(arena: &'ast Bump) -> Self {
        Self {
            arena,
            line: Cell::new(1),
        }
    }

    /// Attribute nodes built from now on to source line `line`.
    pub fn line(&self, line: u32) -> &Self {
        self.line.set(line);
        self
    }

    fn span(&self) -> Span {
        Span::point(self.line.get(), 1)
    }

    fn alloc<T>(&self, v: T) -> &'ast T {
        self.arena.alloc(v)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn literal(&self, kind: LiteralKind<'ast>) -> Expr<'ast> {
        Expr::Literal(LiteralExpr {
            kind,
            span: self.span(),
        })
    }

    pub fn num(&self, v: f64) -> Expr<'ast> {
        self.literal(LiteralKind::Number(v))
    }

    pub fn bool(&self, v: bool) -> Expr<'ast> {
        self.literal(LiteralKind::Bool(v))
    }

    pub fn null(&self) -> Expr<'ast> {
        self.literal(LiteralKind::Null)
    }

    pub fn str(&self, s: &str) -> Expr<'ast> {
        let s = self.arena.alloc_str(s);
        self.literal(LiteralKind::String(s))
    }

    pub fn ident(&self, name: &str) -> Expr<'ast> {
        Expr::Ident(self.name(name))
    }

    fn name(&self, name: &str) -> Ident<'ast> {
        Ident {
            name: self.arena.alloc_str(name),
            span: self.span(),
        }
    }

    /// `a.b.c` as nested member accesses.
    pub fn path(&self, dotted: &str) -> Expr<'ast> {
        let mut parts = dotted.split('.');
        let mut e = self.ident(parts.next().unwrap_or_default());
        for part in parts {
            e = self.member(e, part);
        }
        e
    }

    pub fn unary(&self, op: UnaryOp, operand: Expr<'ast>) -> Expr<'ast> {
        Expr::Unary(self.alloc(UnaryExpr {
            op,
            operand: self.alloc(operand),
            span: self.span(),
        }))
    }

    pub fn neg(&self, operand: Expr<'ast>) -> Expr<'ast> {
        self.unary(UnaryOp::Neg, operand)
    }

    pub fn not(&self, operand: Expr<'ast>) -> Expr<'ast> {
        self.unary(UnaryOp::Not, operand)
    }

    pub fn binary(&self, left: Expr<'ast>, op: BinaryOp, right: Expr<'ast>) -> Expr<'ast> {
        Expr::Binary(self.alloc(BinaryExpr {
            left: self.alloc(left),
            op,
            right: self.alloc(right),
            span: self.span(),
        }))
    }

    pub fn assign(&self, target: Expr<'ast>, value: Expr<'ast>) -> Expr<'ast> {
        Expr::Assign(self.alloc(AssignExpr {
            target: self.alloc(target),
            value: self.alloc(value),
            span: self.span(),
        }))
    }

    pub fn call(&self, callee: Expr<'ast>, args: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::Call(self.alloc(CallExpr {
            callee: self.alloc(callee),
            args: self.arena.alloc_slice_copy(args),
            span: self.span(),
        }))
    }

    pub fn member(&self, object: Expr<'ast>, member: &str) -> Expr<'ast> {
        Expr::Member(self.alloc(MemberExpr {
            object: self.alloc(object),
            member: self.name(member),
            span: self.span(),
        }))
    }

    /// `object.name(args...)`
    pub fn method(&self, object: Expr<'ast>, name: &str, args: &[Expr<'ast>]) -> Expr<'ast> {
        self.call(self.member(object, name), args)
    }

    pub fn array(&self, elements: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::Array(ArrayExpr {
            elements: self.arena.alloc_slice_copy(elements),
            span: self.span(),
        })
    }

    fn names(&self, params: &[&str]) -> &'ast [Ident<'ast>] {
        self.arena
            .alloc_slice_fill_iter(params.iter().map(|p| self.name(p)))
    }

    /// `(params) => { body }`
    pub fn arrow(&self, params: &[&str], body: &[Stmt<'ast>]) -> Expr<'ast> {
        Expr::Arrow(self.alloc(ArrowExpr {
            params: self.names(params),
            body: ArrowBody::Block(self.block_node(body)),
            span: self.span(),
        }))
    }

    /// `(params) => expr`
    pub fn arrow_expr(&self, params: &[&str], body: Expr<'ast>) -> Expr<'ast> {
        Expr::Arrow(self.alloc(ArrowExpr {
            params: self.names(params),
            body: ArrowBody::Expr(self.alloc(body)),
            span: self.span(),
        }))
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub fn decl(&self, kind: DeclKind, name: &str, init: Option<Expr<'ast>>) -> Stmt<'ast> {
        let declarator = Declarator {
            name: self.name(name),
            init: init.map(|e| self.alloc(e)),
            span: self.span(),
        };
        Stmt::Var(self.alloc(VarDecl {
            kind,
            declarators: self.arena.alloc_slice_copy(&[declarator]),
            span: self.span(),
        }))
    }

    pub fn var(&self, name: &str, init: Option<Expr<'ast>>) -> Stmt<'ast> {
        self.decl(DeclKind::Var, name, init)
    }

    pub fn expr_stmt(&self, expr: Expr<'ast>) -> Stmt<'ast> {
        Stmt::Expr(ExprStmt {
            expr: self.alloc(expr),
            span: self.span(),
        })
    }

    pub fn if_(
        &self,
        condition: Expr<'ast>,
        then_stmt: Stmt<'ast>,
        else_stmt: Option<Stmt<'ast>>,
    ) -> Stmt<'ast> {
        Stmt::If(self.alloc(IfStmt {
            condition: self.alloc(condition),
            then_stmt: self.alloc(then_stmt),
            else_stmt: else_stmt.map(|s| self.alloc(s)),
            span: self.span(),
        }))
    }

    fn block_node(&self, stmts: &[Stmt<'ast>]) -> Block<'ast> {
        Block {
            stmts: self.arena.alloc_slice_copy(stmts),
            span: self.span(),
        }
    }

    pub fn block(&self, stmts: &[Stmt<'ast>]) -> Stmt<'ast> {
        Stmt::Block(self.block_node(stmts))
    }

    pub fn ret(&self, value: Option<Expr<'ast>>) -> Stmt<'ast> {
        Stmt::Return(ReturnStmt {
            value: value.map(|e| self.alloc(e)),
            span: self.span(),
        })
    }

    pub fn function(&self, name: &str, params: &[&str], body: &[Stmt<'ast>]) -> Stmt<'ast> {
        let params = self
            .arena
            .alloc_slice_fill_iter(params.iter().map(|p| Param::Ident(self.name(p))));
        Stmt::Function(self.alloc(FunctionDecl {
            name: self.name(name),
            params,
            body: self.block_node(body),
            is_async: false,
            is_generator: false,
            span: self.span(),
        }))
    }

    pub fn script(&self, body: &[Stmt<'ast>]) -> Script<'ast> {
        Script {
            body: self.arena.alloc_slice_copy(body),
        }
    }
}
