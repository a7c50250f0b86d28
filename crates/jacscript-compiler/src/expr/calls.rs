//! Calls: builtins, `Math.*` and user functions.

use std::f64::consts;

use jacscript_ast::{CallExpr, Expr, Ident, LiteralKind, MemberExpr, UnaryOp};
use jacscript_core::{CompilationError, OpAsync, OpBinary, OpCall, OpMath1, OpMath2, OpSync, OpUnary};

use crate::program::{Program, Result};
use crate::value::Value;

/// Shortest `every()` period in milliseconds.
const MIN_EVERY_MS: f64 = 20.0;

#[derive(Debug, Clone, Copy)]
pub(crate) enum MathOp {
    Unary(OpUnary),
    M1(OpMath1),
    M2(OpMath2),
}

/// A `Math.*` function and how it maps onto the VM's math ops.
struct MathFn {
    name: &'static str,
    op: MathOp,
    /// Arguments taken from the script.
    args: usize,
    /// Constant operand placed before the script's arguments.
    first: Option<f64>,
    /// Constant operand placed after the script's arguments.
    last: Option<f64>,
    /// Factor applied to the result.
    scale: Option<f64>,
}

const fn math(name: &'static str, op: MathOp, args: usize) -> MathFn {
    MathFn {
        name,
        op,
        args,
        first: None,
        last: None,
        scale: None,
    }
}

const MATH_FNS: &[MathFn] = &[
    math("floor", MathOp::M1(OpMath1::Floor), 1),
    math("round", MathOp::M1(OpMath1::Round), 1),
    math("ceil", MathOp::M1(OpMath1::Ceil), 1),
    math("log", MathOp::M1(OpMath1::LogE), 1),
    MathFn {
        last: Some(1.0),
        ..math("random", MathOp::M1(OpMath1::Random), 0)
    },
    MathFn {
        scale: Some(consts::LOG10_E),
        ..math("log10", MathOp::M1(OpMath1::LogE), 1)
    },
    MathFn {
        scale: Some(consts::LOG2_E),
        ..math("log2", MathOp::M1(OpMath1::LogE), 1)
    },
    math("max", MathOp::M2(OpMath2::Max), 2),
    math("min", MathOp::M2(OpMath2::Min), 2),
    math("pow", MathOp::M2(OpMath2::Pow), 2),
    MathFn {
        last: Some(0.5),
        ..math("sqrt", MathOp::M2(OpMath2::Pow), 1)
    },
    MathFn {
        last: Some(1.0 / 3.0),
        ..math("cbrt", MathOp::M2(OpMath2::Pow), 1)
    },
    MathFn {
        first: Some(consts::E),
        ..math("exp", MathOp::M2(OpMath2::Pow), 1)
    },
    math("abs", MathOp::Unary(OpUnary::Abs), 1),
];

/// Value of `Math.<name>`.
pub(crate) fn math_constant(name: &str) -> Option<f64> {
    Some(match name {
        "E" => consts::E,
        "PI" => consts::PI,
        "LN2" => consts::LN_2,
        "LN10" => consts::LN_10,
        "LOG2E" => consts::LOG2_E,
        "LOG10E" => consts::LOG10_E,
        "SQRT2" => consts::SQRT_2,
        "SQRT1_2" => consts::FRAC_1_SQRT_2,
        _ => return None,
    })
}

pub(crate) fn require_args(name: &str, call: &CallExpr<'_>, expected: usize) -> Result<()> {
    if call.args.len() != expected {
        return Err(CompilationError::ArgumentCount {
            name: name.to_string(),
            expected,
            got: call.args.len(),
            span: call.span,
        });
    }
    Ok(())
}

/// A numeric literal, possibly negated.
pub(crate) fn literal_number(expr: &Expr<'_>) -> Result<f64> {
    if let Some(v) = expr.as_number() {
        return Ok(v);
    }
    if let Expr::Unary(u) = expr {
        if u.op == UnaryOp::Neg {
            if let Some(v) = u.operand.as_number() {
                return Ok(-v);
            }
        }
    }
    Err(CompilationError::LiteralRequired { span: expr.span() })
}

pub(crate) fn literal_string<'a>(expr: &Expr<'a>) -> Result<&'a str> {
    match expr {
        Expr::Literal(lit) => match lit.kind {
            LiteralKind::String(s) => Ok(s),
            _ => Err(CompilationError::LiteralRequired { span: lit.span }),
        },
        other => Err(CompilationError::LiteralRequired { span: other.span() }),
    }
}

impl<'c> Program<'c> {
    pub(crate) fn emit_call(&mut self, call: &CallExpr<'_>) -> Result<Value<'c>> {
        match call.callee {
            Expr::Ident(id) => self.emit_function_call(id, call),
            Expr::Member(m) => self.emit_method_call(m, call),
            other => Err(CompilationError::unsupported(
                other.span(),
                "only functions and methods can be called",
            )),
        }
    }

    fn emit_function_call(&mut self, id: &Ident<'_>, call: &CallExpr<'_>) -> Result<Value<'c>> {
        match id.name {
            "wait" => {
                require_args("wait", call, 1)?;
                let secs = literal_number(&call.args[0])?;
                let ms = (secs * 1000.0).max(0.0) as u32;
                self.wr().emit_async(OpAsync::Yield, ms + 1, 0, 0);
                Ok(Value::Float(0.0))
            }
            "every" => self.emit_every(call),
            "upload" => self.emit_upload(call),
            "print" | "format" => self.emit_format(id.name == "print", call),
            "panic" => {
                require_args("panic", call, 1)?;
                let code = literal_number(&call.args[0])?;
                if code.fract() != 0.0 || !(1.0..=9999.0).contains(&code) {
                    return Err(CompilationError::InvalidPanicCode {
                        span: call.args[0].span(),
                    });
                }
                self.wr().emit_sync(OpSync::Panic, code as u32, 0, 0, 0);
                Ok(Value::Float(0.0))
            }
            "reboot" => {
                require_args("reboot", call, 0)?;
                self.wr().emit_sync(OpSync::Panic, 0, 0, 0, 0);
                Ok(Value::Float(0.0))
            }
            "isNaN" => {
                require_args("isNaN", call, 1)?;
                self.wr().push();
                let r = self.emit_simple_value(&call.args[0])?;
                self.wr().emit_unary(OpUnary::IsNan, r, r);
                self.wr().pop_except(Some(r));
                Ok(Value::Reg(r))
            }
            "condition" => Err(CompilationError::TopLevelOnly {
                construct: "role declaration".into(),
                span: call.span,
            }),
            name => match self.resolve(name) {
                Some(Value::Function(f)) => self.emit_user_call(f, call),
                Some(other) => Err(CompilationError::unsupported(
                    id.span,
                    format!("'{name}' is {}, not a function", other.describe()),
                )),
                None => Err(CompilationError::UnknownName {
                    name: name.to_string(),
                    span: id.span,
                }),
            },
        }
    }

    fn emit_method_call(&mut self, m: &MemberExpr<'_>, call: &CallExpr<'_>) -> Result<Value<'c>> {
        match m.object.as_ident() {
            Some("Math") => return self.emit_math_call(m.member.name, call),
            Some("roles") if self.resolve("roles").is_none() => {
                return Err(CompilationError::TopLevelOnly {
                    construct: "role declaration".into(),
                    span: call.span,
                });
            }
            _ => {}
        }
        let obj = self.emit_expr(m.object)?;
        self.emit_method(obj, &m.member, call)
    }

    fn emit_user_call(&mut self, f: usize, call: &CallExpr<'_>) -> Result<Value<'c>> {
        let (proc, num_params) = {
            let cell = &self.functions[f];
            (cell.proc, cell.num_params)
        };
        let name = self.functions[f].name.clone();
        require_args(&name, call, num_params)?;
        self.wr().push();
        self.emit_args(call.args)?;
        self.wr().pop();
        self.wr().emit_call(proc, num_params, OpCall::Sync);
        let r = self.wr().alloc_reg()?;
        self.wr().emit_mov(r, 0);
        Ok(Value::Reg(r))
    }

    fn emit_every(&mut self, call: &CallExpr<'_>) -> Result<Value<'c>> {
        self.require_top_level("every()")?;
        require_args("every", call, 2)?;
        let ms = (literal_number(&call.args[0])? * 1000.0).round();
        if ms < MIN_EVERY_MS {
            return Err(CompilationError::other(
                call.args[0].span(),
                format!("every() period must be at least {MIN_EVERY_MS}ms"),
            ));
        }
        let proc = self.emit_handler("every".into(), &call.args[1], Some(ms as u32))?;
        self.wr().emit_call(proc, 0, OpCall::Bg);
        Ok(Value::Float(0.0))
    }

    fn emit_upload(&mut self, call: &CallExpr<'_>) -> Result<Value<'c>> {
        let Some((label, rest)) = call.args.split_first() else {
            return Err(CompilationError::ArgumentCount {
                name: "upload".into(),
                expected: 1,
                got: 0,
                span: call.span,
            });
        };
        let label = literal_string(label)?;
        self.wr().push();
        self.emit_args(rest)?;
        self.emit_string_literal(label)?;
        self.wr().pop();
        self.wr()
            .emit_async(OpAsync::CloudUpload, rest.len() as u32, 0, 0);
        Ok(Value::Float(0.0))
    }

    /// `print(fmt, ...)` logs; `format(fmt, ...)` leaves the text in the
    /// packet buffer.
    fn emit_format(&mut self, print: bool, call: &CallExpr<'_>) -> Result<Value<'c>> {
        let Some((fmt, rest)) = call.args.split_first() else {
            return Err(CompilationError::ArgumentCount {
                name: if print { "print" } else { "format" }.into(),
                expected: 1,
                got: 0,
                span: call.span,
            });
        };
        let idx = self.string_literal(literal_string(fmt)?);
        let n = rest.len() as u32;
        self.wr().push();
        self.emit_args(rest)?;
        self.wr().pop();
        if print {
            self.wr().emit_sync(OpSync::LogFormat, idx, n, 0, 0);
            Ok(Value::Float(0.0))
        } else {
            self.wr().alloc_buf()?;
            self.wr().emit_sync(OpSync::SetupBuffer, 0, 0, 0, 0);
            self.wr().emit_sync(OpSync::Format, idx, n, 0, 0);
            Ok(Value::Buffer)
        }
    }

    pub(crate) fn emit_math_call(&mut self, name: &str, call: &CallExpr<'_>) -> Result<Value<'c>> {
        let Some(f) = MATH_FNS.iter().find(|f| f.name == name) else {
            return Err(CompilationError::UnknownMember {
                object: "Math".into(),
                member: name.to_string(),
                span: call.span,
            });
        };
        require_args(&format!("Math.{name}"), call, f.args)?;
        let r = self.emit_math_with(f.op, f.first, call.args, f.last)?;
        if let Some(k) = f.scale {
            self.wr().push();
            let t = self.wr().alloc_reg()?;
            self.load_float(t, k);
            self.wr().emit_bin(OpBinary::Mul, r, t);
            self.wr().pop();
        }
        Ok(Value::Reg(r))
    }

    pub(crate) fn emit_math(&mut self, op: MathOp, args: &[Expr<'_>]) -> Result<Value<'c>> {
        self.emit_math_with(op, None, args, None).map(Value::Reg)
    }

    fn emit_math_with(
        &mut self,
        op: MathOp,
        first: Option<f64>,
        args: &[Expr<'_>],
        last: Option<f64>,
    ) -> Result<u8> {
        self.wr().push();
        if let MathOp::Unary(u) = op {
            let r = self.emit_simple_value(&args[0])?;
            self.wr().emit_unary(u, r, r);
            self.wr().pop_except(Some(r));
            return Ok(r);
        }

        let mut vals = Vec::with_capacity(args.len() + 2);
        vals.extend(first.map(Value::Float));
        for arg in args {
            let v = self.emit_expr(arg)?;
            if !v.is_number() {
                return Err(CompilationError::ValueRequired { span: arg.span() });
            }
            vals.push(v);
        }
        vals.extend(last.map(Value::Float));

        let regs = self.wr().alloc_args(vals.len())?;
        for (r, v) in regs.into_iter().zip(vals) {
            self.assign(Value::Reg(r), v)?;
        }
        match op {
            MathOp::M1(m) => self.wr().emit_sync(OpSync::Math1, m as u32, 0, 0, 0),
            MathOp::M2(m) => self.wr().emit_sync(OpSync::Math2, m as u32, 0, 0, 0),
            MathOp::Unary(_) => {}
        }
        self.wr().pop();
        let r = self.wr().alloc_reg()?;
        self.wr().emit_mov(r, 0);
        Ok(r)
    }
}
