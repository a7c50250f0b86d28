//! Statement nodes.

use crate::expr::{Expr, Ident};
use jacscript_core::Span;

/// A whole program: the top-level statements in source order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Script<'ast> {
    pub body: &'ast [Stmt<'ast>],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stmt<'ast> {
    Var(&'ast VarDecl<'ast>),
    Expr(ExprStmt<'ast>),
    If(&'ast IfStmt<'ast>),
    Block(Block<'ast>),
    Return(ReturnStmt<'ast>),
    Function(&'ast FunctionDecl<'ast>),
}

impl<'ast> Stmt<'ast> {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Var(s) => s.span,
            Stmt::Expr(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::Block(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Function(s) => s.span,
        }
    }
}

/// Declaration keyword. Only `var` is accepted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarDecl<'ast> {
    pub kind: DeclKind,
    pub declarators: &'ast [Declarator<'ast>],
    pub span: Span,
}

/// `name = init` within a declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Declarator<'ast> {
    pub name: Ident<'ast>,
    pub init: Option<&'ast Expr<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExprStmt<'ast> {
    pub expr: &'ast Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IfStmt<'ast> {
    pub condition: &'ast Expr<'ast>,
    pub then_stmt: &'ast Stmt<'ast>,
    pub else_stmt: Option<&'ast Stmt<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block<'ast> {
    pub stmts: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStmt<'ast> {
    pub value: Option<&'ast Expr<'ast>>,
    pub span: Span,
}

/// A function parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param<'ast> {
    Ident(Ident<'ast>),
    /// A destructuring or defaulted parameter; never compiled.
    Pattern(Span),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionDecl<'ast> {
    pub name: Ident<'ast>,
    pub params: &'ast [Param<'ast>],
    pub body: Block<'ast>,
    pub is_async: bool,
    pub is_generator: bool,
    pub span: Span,
}
