//! Expression nodes.

use crate::stmt::Block;
use crate::{BinaryOp, UnaryOp};
use jacscript_core::Span;

/// A name with its position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ident<'ast> {
    pub name: &'ast str,
    pub span: Span,
}

/// An expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expr<'ast> {
    Literal(LiteralExpr<'ast>),
    Ident(Ident<'ast>),
    Unary(&'ast UnaryExpr<'ast>),
    Binary(&'ast BinaryExpr<'ast>),
    /// `target = value`
    Assign(&'ast AssignExpr<'ast>),
    Call(&'ast CallExpr<'ast>),
    /// `object.member`
    Member(&'ast MemberExpr<'ast>),
    /// `[a, b]`, only meaningful as a destructuring target
    Array(ArrayExpr<'ast>),
    /// `(a, b) => body`
    Arrow(&'ast ArrowExpr<'ast>),
}

impl<'ast> Expr<'ast> {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(e) => e.span,
            Expr::Ident(e) => e.span,
            Expr::Unary(e) => e.span,
            Expr::Binary(e) => e.span,
            Expr::Assign(e) => e.span,
            Expr::Call(e) => e.span,
            Expr::Member(e) => e.span,
            Expr::Array(e) => e.span,
            Expr::Arrow(e) => e.span,
        }
    }

    /// The name, if this is a bare identifier.
    pub fn as_ident(&self) -> Option<&'ast str> {
        match self {
            Expr::Ident(id) => Some(id.name),
            _ => None,
        }
    }

    /// The value, if this is a numeric literal.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Literal(LiteralExpr {
                kind: LiteralKind::Number(v),
                ..
            }) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiteralExpr<'ast> {
    pub kind: LiteralKind<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiteralKind<'ast> {
    Number(f64),
    Bool(bool),
    Null,
    String(&'ast str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnaryExpr<'ast> {
    pub op: UnaryOp,
    pub operand: &'ast Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryExpr<'ast> {
    pub left: &'ast Expr<'ast>,
    pub op: BinaryOp,
    pub right: &'ast Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignExpr<'ast> {
    pub target: &'ast Expr<'ast>,
    pub value: &'ast Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallExpr<'ast> {
    pub callee: &'ast Expr<'ast>,
    pub args: &'ast [Expr<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberExpr<'ast> {
    pub object: &'ast Expr<'ast>,
    pub member: Ident<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrayExpr<'ast> {
    pub elements: &'ast [Expr<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrowExpr<'ast> {
    pub params: &'ast [Ident<'ast>],
    pub body: ArrowBody<'ast>,
    pub span: Span,
}

/// Body of an arrow function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArrowBody<'ast> {
    Block(Block<'ast>),
    /// `() => expr`
    Expr(&'ast Expr<'ast>),
}
