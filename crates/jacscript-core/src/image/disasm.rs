//! Human-readable listings of images and single instructions.

use std::fmt::Write;

use super::ImageInfo;
use crate::DebugInfo;
use crate::format::{
    CellKind, Instr, OpAsync, OpBinary, OpCall, OpFmt, OpMath1, OpMath2, OpRoleProperty, OpSync,
    OpTop, OpUnary, Params, ValueSpecial,
};

/// Supplies names for indices found in instructions.
pub trait InstrResolver {
    fn function_name(&self, _index: usize) -> Option<String> {
        None
    }
    fn role_name(&self, _index: usize) -> Option<String> {
        None
    }
    fn global_name(&self, _index: usize) -> Option<String> {
        None
    }
    fn local_name(&self, _index: usize) -> Option<String> {
        None
    }
    fn float(&self, _index: usize) -> Option<f64> {
        None
    }
}

/// Resolver that knows nothing; every index prints bare.
impl InstrResolver for () {}

/// Names from an image and, optionally, its debug info.
struct ImageNames<'a> {
    image: &'a ImageInfo,
    debug: Option<&'a DebugInfo>,
    function: usize,
}

impl InstrResolver for ImageNames<'_> {
    fn function_name(&self, index: usize) -> Option<String> {
        self.debug?.function_name(index).map(str::to_owned)
    }
    fn role_name(&self, index: usize) -> Option<String> {
        self.debug?.role_name(index).map(str::to_owned)
    }
    fn global_name(&self, index: usize) -> Option<String> {
        self.debug?.global_name(index).map(str::to_owned)
    }
    fn local_name(&self, index: usize) -> Option<String> {
        let f = self.debug?.functions.get(self.function)?;
        f.locals.get(index).map(|l| l.name.clone())
    }
    fn float(&self, index: usize) -> Option<f64> {
        self.image.floats.get(index).copied()
    }
}

/// Render one instruction.
///
/// Prefix words update `params` and render as `[A 0x..]`; any other word
/// consumes the accumulated operands and clears them.
pub fn stringify_instr(instr: Instr, params: &mut Params, names: &dyn InstrResolver) -> String {
    let prefix_name = ["A", "B", "C", "D"];
    match instr.op() {
        Some(op @ (OpTop::SetA | OpTop::SetB | OpTop::SetC | OpTop::SetD)) => {
            params.absorb(instr);
            return format!("[{} {:#x}]", prefix_name[op as usize], instr.arg12());
        }
        Some(OpTop::SetHigh) => {
            params.absorb(instr);
            return format!(
                "[upper {} {:#x}]",
                prefix_name[(instr.arg12() >> 10) as usize],
                instr.arg10()
            );
        }
        _ => {}
    }

    let p = params.resolve(instr);
    *params = Params::default();
    let r0 = instr.subop();
    let (r1, r2) = (instr.reg1(), instr.reg2());

    let role = |idx: u32| {
        let name = names.role_name(idx as usize).unwrap_or_default();
        format!("{name}_r{idx}")
    };

    match instr.op() {
        Some(OpTop::Unary) => {
            let op = match OpUnary::try_from(instr.subop() as u8) {
                Ok(OpUnary::Id) => "",
                Ok(OpUnary::Neg) => "-",
                Ok(OpUnary::Not) => "!",
                Ok(OpUnary::Abs) => "abs ",
                Ok(OpUnary::IsNan) => "isnan ",
                Err(_) => "??? ",
            };
            format!("R{r1} := {op}R{r2}")
        }
        Some(OpTop::Binary) => {
            let op = match OpBinary::try_from(instr.subop() as u8) {
                Ok(OpBinary::Add) => "+",
                Ok(OpBinary::Sub) => "-",
                Ok(OpBinary::Div) => "/",
                Ok(OpBinary::Mul) => "*",
                Ok(OpBinary::Lt) => "<",
                Ok(OpBinary::Le) => "<=",
                Ok(OpBinary::Eq) => "==",
                Ok(OpBinary::Ne) => "!=",
                Ok(OpBinary::And) => "&&",
                Ok(OpBinary::Or) => "||",
                Err(_) => "???",
            };
            format!("R{r1} := R{r1} {op} R{r2}")
        }
        Some(OpTop::LoadCell) => format!("R{r0} := {}", cell(p, names)),
        Some(OpTop::StoreCell) => format!("{} := R{r0}", cell(p, names)),
        Some(OpTop::Jump) => {
            let dir = if instr.jump_back() { '-' } else { '+' };
            let cond = if instr.jump_if_zero() {
                format!(" if R{r0} == 0")
            } else {
                String::new()
            };
            format!("jump {dir}{}{cond}", p.b)
        }
        Some(OpTop::Call) => {
            let kind = match OpCall::try_from((instr.arg8() >> 6) as u8) {
                Ok(OpCall::Sync) => "",
                Ok(OpCall::Bg) => " bg",
                Ok(OpCall::BgMax1) => " bg (max1)",
                Ok(OpCall::BgMax1Pend1) => " bg (max1 pend1)",
                Err(_) => " ???",
            };
            let name = names.function_name(p.b as usize).unwrap_or_default();
            format!("call{kind} {name}_F{} #{r0} save={:b}", p.b, p.d)
        }
        Some(OpTop::Sync) => match OpSync::try_from(instr.arg8() as u8) {
            Ok(OpSync::Return) => "return".into(),
            Ok(OpSync::SetupBuffer) => format!("setup_buffer(size={})", p.a),
            Ok(OpSync::ObserveRole) => format!("observe({})", role(p.a)),
            Ok(OpSync::Format) => format!("format(str={} #{} @{})", p.a, p.b, p.c),
            Ok(OpSync::Memcpy) => format!("memcpy(str={} @{})", p.a, p.c),
            Ok(OpSync::LogFormat) => format!("log(str={} #{})", p.a, p.b),
            Ok(OpSync::Math1) => match OpMath1::try_from(p.a as u8) {
                Ok(op) => format!("R0 := {}(R0)", format!("{op:?}").to_lowercase()),
                Err(_) => format!("math1_{}", p.a),
            },
            Ok(OpSync::Math2) => match OpMath2::try_from(p.a as u8) {
                Ok(op) => format!("R0 := {}(R0, R1)", format!("{op:?}").to_lowercase()),
                Err(_) => format!("math2_{}", p.a),
            },
            Ok(OpSync::Panic) => format!("panic({})", p.a),
            Err(_) => format!("sync_{:#x}", instr.arg8()),
        },
        Some(OpTop::Async) => {
            let op = match OpAsync::try_from(instr.arg8() as u8) {
                Ok(OpAsync::Yield) => format!("yield(wait={}ms)", p.a),
                Ok(OpAsync::CloudUpload) => format!("upload(#{})", p.a),
                Ok(OpAsync::QueryReg) => {
                    format!("query({}.reg_{:#x} timeout={}ms)", role(p.a), p.b, p.c)
                }
                Ok(OpAsync::SendCmd) => format!("send({}.cmd_{:#x})", role(p.a), p.b),
                Err(_) => format!("async_{:#x}", instr.arg8()),
            };
            format!("{op} save={:b}", p.d)
        }
        _ => format!("??? {:#06x}", instr.0),
    }
}

fn cell(p: Params, names: &dyn InstrResolver) -> String {
    let idx = p.b;
    match CellKind::try_from(p.a as u8) {
        Ok(CellKind::Local) => {
            let name = names.local_name(idx as usize).unwrap_or_default();
            format!("{name}_L{idx}")
        }
        Ok(CellKind::Global) => {
            let name = names.global_name(idx as usize).unwrap_or_default();
            format!("{name}_G{idx}")
        }
        Ok(CellKind::FloatConst) => match names.float(idx as usize) {
            Some(v) => format!("{v}_F{idx}"),
            None => format!("_F{idx}"),
        },
        Ok(CellKind::Identity) => idx.to_string(),
        Ok(CellKind::Buffer) => format!("buf[{} @ {}]", p.c, numfmt(idx)),
        Ok(CellKind::Special) => match ValueSpecial::try_from(idx as u8) {
            Ok(ValueSpecial::Nan) => "NAN".into(),
            Ok(ValueSpecial::Size) => "SIZE".into(),
            Ok(ValueSpecial::EvCode) => "EV_CODE".into(),
            Ok(ValueSpecial::RegGetCode) => "REG_GET_CODE".into(),
            Ok(ValueSpecial::RoleId) => "ROLE_ID".into(),
            Err(_) => format!("SPEC[{idx}]"),
        },
        Ok(CellKind::RoleProperty) => {
            let role = names.role_name(idx as usize).unwrap_or_default();
            match OpRoleProperty::try_from(p.c as u8) {
                Ok(OpRoleProperty::IsConnected) => format!("{role}_r{idx}.isConnected"),
                Err(_) => format!("{role}_r{idx}.prop{}", p.c),
            }
        }
        Err(_) => format!("C{}[{idx}]", p.a),
    }
}

fn numfmt(v: u32) -> String {
    let Ok(fmt) = OpFmt::try_from((v & 0xf) as u8) else {
        return format!("fmt{v:#x}");
    };
    let letter = if fmt.is_float() {
        'f'
    } else if fmt.is_signed() {
        'i'
    } else {
        'u'
    };
    let bits = fmt.bit_size();
    let shift = v >> 4;
    if shift != 0 {
        format!("{letter}{}.{shift}", bits.saturating_sub(shift))
    } else {
        format!("{letter}{bits}")
    }
}

/// Render a listing of every function, role and literal in `image`.
pub fn disassemble(image: &ImageInfo, debug: Option<&DebugInfo>) -> String {
    let mut out = String::new();

    for (index, f) in image.functions.iter().enumerate() {
        let names = ImageNames {
            image,
            debug,
            function: index,
        };
        let fdbg = debug.and_then(|d| d.functions.get(index));
        let name = fdbg.map(|d| d.name.as_str()).unwrap_or_default();
        let _ = writeln!(
            out,
            "fun {name}_F{index} locals={} regs={} params={}",
            f.num_locals, f.num_regs, f.num_params
        );

        let mut params = Params::default();
        let mut line = None;
        for (pc, word) in image.function_code(index).iter().enumerate() {
            if let Some(l) = fdbg.and_then(|d| d.line_at(pc as u32)) {
                if line != Some(l) {
                    let _ = writeln!(out, "  ; line {l}");
                    line = Some(l);
                }
            }
            let instr = Instr(*word);
            let indent = if instr.is_prefix() { "    " } else { "        " };
            let text = stringify_instr(instr, &mut params, &names);
            let _ = writeln!(out, "{pc:4}:{indent}{text}");
        }
        out.push('\n');
    }

    for (index, role) in image.roles.iter().enumerate() {
        let name = debug.and_then(|d| d.role_name(index)).unwrap_or_default();
        let _ = writeln!(out, "role #{index} = {:#010x} {name}", role.class_id);
    }
    for (index, v) in image.floats.iter().enumerate() {
        let _ = writeln!(out, "float #{index} = {v}");
    }
    for (index, s) in image.strings.iter().enumerate() {
        let _ = writeln!(out, "str #{index} = {:?}", String::from_utf8_lossy(s));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(words: &[Instr]) -> Vec<String> {
        let mut params = Params::default();
        words
            .iter()
            .map(|&i| stringify_instr(i, &mut params, &()))
            .collect()
    }

    #[test]
    fn binary_and_unary() {
        let out = render(&[
            Instr::new(OpTop::Binary, (OpBinary::Add as u16) << 8 | 0x21),
            Instr::new(OpTop::Unary, (OpUnary::Not as u16) << 8 | 0x34),
        ]);
        assert_eq!(out, vec!["R2 := R2 + R1", "R3 := !R4"]);
    }

    #[test]
    fn prefixed_yield() {
        let out = render(&[
            Instr::new(OpTop::SetA, 1001),
            Instr::new(OpTop::Async, OpAsync::Yield as u16),
        ]);
        assert_eq!(out, vec!["[A 0x3e9]", "yield(wait=1001ms) save=0"]);
    }

    #[test]
    fn buffer_cell_format() {
        // kind BUFFER = 4: A prefix 1, low bits 0; idx = shift 16, fmt U16
        let idx: u16 = (16 << 4) | OpFmt::U16 as u16;
        let out = render(&[
            Instr::new(OpTop::SetA, 1),
            Instr::new(OpTop::SetB, idx >> 6),
            Instr::new(OpTop::SetC, 2),
            Instr::new(OpTop::LoadCell, (5 << 8) | (idx & 0x3f)),
        ]);
        assert_eq!(out[3], "R5 := buf[2 @ u0.16]");
    }

    #[test]
    fn backward_conditional_jump() {
        let out = render(&[Instr::new(OpTop::Jump, (1 << 8) | (1 << 7) | (1 << 6) | 12)]);
        assert_eq!(out, vec!["jump -12 if R1 == 0"]);
    }
}
