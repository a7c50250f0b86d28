//! Expression lowering.
//!
//! [`Program::emit_expr`] turns an expression into a [`Value`]. Numbers end
//! up in registers, cells or constants; roles, registers and events come
//! back as descriptors that a surrounding member access or call consumes.
//!
//! ## Modules
//!
//! - `calls` - builtins, `Math.*` and user function calls
//! - `roles` - members and methods of roles, registers and events

mod calls;
mod roles;

use jacscript_ast::{
    AssignExpr, BinaryExpr, BinaryOp, Expr, Ident, LiteralExpr, LiteralKind, MemberExpr, UnaryExpr,
    UnaryOp,
};
use jacscript_core::{CompilationError, OpBinary, OpMath2, OpSync, OpUnary};

use crate::program::{Program, Result};
use crate::value::{Value, truthy};

impl<'c> Program<'c> {
    /// Lower `expr`. Errors without a position get the expression's span.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn emit_expr(&mut self, expr: &Expr<'_>) -> Result<Value<'c>> {
        self.emit_expr_inner(expr)
            .map_err(|e| e.or_span(expr.span()))
    }

    fn emit_expr_inner(&mut self, expr: &Expr<'_>) -> Result<Value<'c>> {
        match expr {
            Expr::Literal(lit) => self.emit_literal(lit),
            Expr::Ident(id) => self.emit_ident(id),
            Expr::Unary(u) => self.emit_unary(u),
            Expr::Binary(b) => self.emit_binary(b),
            Expr::Assign(a) => self.emit_assign(a),
            Expr::Call(c) => self.emit_call(c),
            Expr::Member(m) => self.emit_member(m),
            Expr::Array(a) => Err(CompilationError::unsupported(
                a.span,
                "array literals are only allowed as assignment targets",
            )),
            Expr::Arrow(a) => Err(CompilationError::unsupported(
                a.span,
                "arrow functions are only allowed as handler arguments",
            )),
        }
    }

    fn emit_literal(&mut self, lit: &LiteralExpr<'_>) -> Result<Value<'c>> {
        match lit.kind {
            LiteralKind::Number(v) => Ok(Value::Float(v)),
            LiteralKind::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
            LiteralKind::Null => Ok(Value::Float(f64::NAN)),
            LiteralKind::String(s) => self.emit_string_literal(s),
        }
    }

    /// Copy a string literal into a fresh packet buffer.
    pub(crate) fn emit_string_literal(&mut self, s: &str) -> Result<Value<'c>> {
        self.wr().alloc_buf()?;
        let idx = self.string_literal(s);
        self.wr().emit_sync(OpSync::SetupBuffer, 0, 0, 0, 0);
        self.wr().emit_sync(OpSync::Memcpy, idx, 0, 0, 0);
        Ok(Value::Buffer)
    }

    fn emit_ident(&mut self, id: &Ident<'_>) -> Result<Value<'c>> {
        if let Some(v) = self.resolve(id.name) {
            return Ok(v);
        }
        match id.name {
            "NaN" | "undefined" => Ok(Value::Float(f64::NAN)),
            "Infinity" => Ok(Value::Float(f64::INFINITY)),
            name => Err(CompilationError::UnknownName {
                name: name.to_string(),
                span: id.span,
            }),
        }
    }

    fn emit_unary(&mut self, u: &UnaryExpr<'_>) -> Result<Value<'c>> {
        if let Some(v) = u.operand.as_number() {
            return Ok(Value::Float(match u.op {
                UnaryOp::Neg => -v,
                UnaryOp::Plus => v,
                UnaryOp::Not => {
                    if truthy(v) {
                        0.0
                    } else {
                        1.0
                    }
                }
            }));
        }
        let op = match u.op {
            UnaryOp::Not => OpUnary::Not,
            UnaryOp::Neg => OpUnary::Neg,
            UnaryOp::Plus => OpUnary::Id,
        };
        self.wr().push();
        let r = self.emit_simple_value(u.operand)?;
        self.wr().emit_unary(op, r, r);
        self.wr().pop_except(Some(r));
        Ok(Value::Reg(r))
    }

    fn emit_binary(&mut self, b: &BinaryExpr<'_>) -> Result<Value<'c>> {
        let (op, swap) = match b.op {
            BinaryOp::Add => (OpBinary::Add, false),
            BinaryOp::Sub => (OpBinary::Sub, false),
            BinaryOp::Mul => (OpBinary::Mul, false),
            BinaryOp::Div => (OpBinary::Div, false),
            BinaryOp::Less => (OpBinary::Lt, false),
            BinaryOp::LessEqual => (OpBinary::Le, false),
            BinaryOp::Greater => (OpBinary::Lt, true),
            BinaryOp::GreaterEqual => (OpBinary::Le, true),
            BinaryOp::Equal | BinaryOp::StrictEqual => (OpBinary::Eq, false),
            BinaryOp::NotEqual | BinaryOp::StrictNotEqual => (OpBinary::Ne, false),
            BinaryOp::LogicalAnd => (OpBinary::And, false),
            BinaryOp::LogicalOr => (OpBinary::Or, false),
            BinaryOp::Pow => {
                return self.emit_math(calls::MathOp::M2(OpMath2::Pow), &[*b.left, *b.right]);
            }
        };
        self.wr().push();
        let mut a = self.emit_simple_value(b.left)?;
        let mut c = self.emit_simple_value(b.right)?;
        if swap {
            std::mem::swap(&mut a, &mut c);
        }
        self.wr().emit_bin(op, a, c);
        self.wr().pop_except(Some(a));
        Ok(Value::Reg(a))
    }

    fn emit_assign(&mut self, a: &AssignExpr<'_>) -> Result<Value<'c>> {
        match a.target {
            Expr::Ident(id) => {
                let dst = self.lookup_var(id.name, id.span)?;
                let src = self.emit_expr(a.value)?;
                self.assign(dst, src)
                    .map_err(|e| e.or_span(a.value.span()))?;
                Ok(src)
            }
            Expr::Array(arr) => {
                let src = self.emit_expr(a.value)?;
                let Value::ValueSeq { packet, .. } = src else {
                    return Err(CompilationError::unsupported(
                        a.value.span(),
                        "destructuring needs a multi-field register read",
                    ));
                };
                if arr.elements.len() > packet.fields.len() {
                    return Err(CompilationError::other(
                        arr.span,
                        format!(
                            "'{}' has only {} field(s)",
                            packet.name,
                            packet.fields.len()
                        ),
                    ));
                }
                self.wr().push();
                let tmp = self.wr().alloc_reg()?;
                let mut offset = 0;
                for (el, field) in arr.elements.iter().zip(&packet.fields) {
                    let Expr::Ident(id) = el else {
                        return Err(CompilationError::ExpectedVariable { span: el.span() });
                    };
                    let dst = self.lookup_var(id.name, id.span)?;
                    self.emit_buf_load(tmp, field, offset)?;
                    self.assign(dst, Value::Reg(tmp))?;
                    offset += field.byte_size();
                }
                self.wr().pop();
                Ok(Value::Float(0.0))
            }
            other => Err(CompilationError::ExpectedVariable { span: other.span() }),
        }
    }

    fn emit_member(&mut self, m: &MemberExpr<'_>) -> Result<Value<'c>> {
        if m.object.as_ident() == Some("Math") {
            return calls::math_constant(m.member.name)
                .map(Value::Float)
                .ok_or_else(|| CompilationError::UnknownMember {
                    object: "Math".into(),
                    member: m.member.name.to_string(),
                    span: m.member.span,
                });
        }
        let obj = self.emit_expr(m.object)?;
        match obj {
            Value::Role(role) => self.role_member(role, &m.member),
            Value::Register { role, packet } if packet.fields.len() > 1 => {
                self.emit_field_read(role, packet, &m.member)
            }
            other => Err(CompilationError::UnknownMember {
                object: other.describe().into(),
                member: m.member.name.to_string(),
                span: m.member.span,
            }),
        }
    }
}
