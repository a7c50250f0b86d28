use super::{FunctionInfo, ImageInfo};
use crate::ImageError;
use crate::format::{
    CellKind, Instr, MAX_PAYLOAD_SIZE, NUM_REGS, OpAsync, OpBinary, OpCall, OpFmt, OpMath1,
    OpMath2, OpRoleProperty, OpSync, OpTop, OpUnary, Params, SECTIONS_START, Section,
    ValueSpecial,
};

/// Check that `image` is something the compiler could have produced.
///
/// [`ImageInfo::load`] already guarantees every table is in bounds. This
/// additionally checks section and function ordering, and that every
/// instruction only names locals, globals, literals, roles, strings and
/// functions that exist and only jumps inside its own function.
pub fn verify(image: &ImageInfo) -> Result<(), ImageError> {
    let mut expected = SECTIONS_START as u32;
    for (range, section) in image.sections.iter().zip(Section::ALL) {
        if range.start != expected {
            return Err(ImageError::SectionOrder {
                section: section.name(),
            });
        }
        expected = range.end();
    }

    let code = image.sections[Section::FunctionCode as usize];
    let mut next = code.start;
    for (index, f) in image.functions.iter().enumerate() {
        if f.code.start != next {
            return Err(ImageError::BadFunction {
                index,
                message: format!("body at {:#x}, expected {next:#x}", f.code.start),
            });
        }
        if f.code.len == 0 {
            return Err(ImageError::BadFunction {
                index,
                message: "empty body".into(),
            });
        }
        if f.num_regs as usize > NUM_REGS {
            return Err(ImageError::BadFunction {
                index,
                message: format!("{} saved registers", f.num_regs),
            });
        }
        next = f.code.end();
        verify_function(image, index, f)?;
    }
    if next != code.end() {
        return Err(ImageError::SectionOrder {
            section: Section::FunctionCode.name(),
        });
    }
    Ok(())
}

fn verify_function(image: &ImageInfo, function: usize, f: &FunctionInfo) -> Result<(), ImageError> {
    let body = image.function_code(function);
    let mut params = Params::default();
    let mut pending_prefix = false;

    for (pc, word) in body.iter().enumerate() {
        let instr = Instr(*word);
        let fail = |message: String| ImageError::BadInstruction {
            function,
            pc,
            message,
        };

        if params.absorb(instr) {
            pending_prefix = true;
            continue;
        }
        pending_prefix = false;
        let p = params.resolve(instr);
        params = Params::default();

        let Some(op) = instr.op() else {
            return Err(fail(format!("unknown opcode {:#06x}", instr.0)));
        };
        match op {
            OpTop::SetA | OpTop::SetB | OpTop::SetC | OpTop::SetD | OpTop::SetHigh => {}
            OpTop::Unary => {
                OpUnary::try_from(instr.subop() as u8)
                    .map_err(|_| fail(format!("unknown unary op {}", instr.subop())))?;
            }
            OpTop::Binary => {
                OpBinary::try_from(instr.subop() as u8)
                    .map_err(|_| fail(format!("unknown binary op {}", instr.subop())))?;
            }
            OpTop::LoadCell | OpTop::StoreCell => {
                verify_cell(image, f, p, op == OpTop::StoreCell).map_err(fail)?;
            }
            OpTop::Jump => {
                let target = if instr.jump_back() {
                    (pc as i64 + 1) - p.b as i64
                } else {
                    (pc as i64 + 1) + p.b as i64
                };
                if target < 0 || target >= body.len() as i64 {
                    return Err(fail(format!("jump target {target} outside function")));
                }
            }
            OpTop::Call => {
                let kind = OpCall::try_from((instr.arg8() >> 6) as u8)
                    .map_err(|_| fail("unknown call kind".into()))?;
                let Some(callee) = image.functions.get(p.b as usize) else {
                    return Err(fail(format!("call to unknown function {}", p.b)));
                };
                let numargs = instr.subop();
                if numargs > callee.num_locals {
                    return Err(fail(format!(
                        "{numargs} arguments for {} locals",
                        callee.num_locals
                    )));
                }
                if kind == OpCall::Sync {
                    verify_saved(f, p.d).map_err(fail)?;
                } else if p.d != 0 {
                    return Err(fail("background call saves registers".into()));
                }
            }
            OpTop::Sync => {
                let sync = OpSync::try_from(instr.arg8() as u8)
                    .map_err(|_| fail(format!("unknown sync op {}", instr.arg8())))?;
                match sync {
                    OpSync::Return | OpSync::Panic => {}
                    OpSync::SetupBuffer => {
                        if p.a as usize > MAX_PAYLOAD_SIZE {
                            return Err(fail(format!("buffer size {}", p.a)));
                        }
                    }
                    OpSync::ObserveRole => check_role(image, p.a).map_err(fail)?,
                    OpSync::Format | OpSync::Memcpy | OpSync::LogFormat => {
                        if p.a as usize >= image.strings.len() {
                            return Err(fail(format!("unknown string {}", p.a)));
                        }
                        if sync != OpSync::LogFormat && p.c as usize > MAX_PAYLOAD_SIZE {
                            return Err(fail(format!("buffer offset {}", p.c)));
                        }
                    }
                    OpSync::Math1 => {
                        OpMath1::try_from(p.a as u8)
                            .map_err(|_| fail(format!("unknown math1 op {}", p.a)))?;
                    }
                    OpSync::Math2 => {
                        OpMath2::try_from(p.a as u8)
                            .map_err(|_| fail(format!("unknown math2 op {}", p.a)))?;
                    }
                }
            }
            OpTop::Async => {
                let op = OpAsync::try_from(instr.arg8() as u8)
                    .map_err(|_| fail(format!("unknown async op {}", instr.arg8())))?;
                if matches!(op, OpAsync::QueryReg | OpAsync::SendCmd) {
                    check_role(image, p.a).map_err(fail)?;
                }
                verify_saved(f, p.d).map_err(fail)?;
            }
        }
    }

    if pending_prefix {
        return Err(ImageError::BadInstruction {
            function,
            pc: body.len().saturating_sub(1),
            message: "function ends with a prefix".into(),
        });
    }
    Ok(())
}

fn verify_cell(image: &ImageInfo, f: &FunctionInfo, p: Params, store: bool) -> Result<(), String> {
    let kind = CellKind::try_from(p.a as u8).map_err(|_| format!("unknown cell kind {}", p.a))?;
    let idx = p.b as usize;
    if store && !matches!(kind, CellKind::Local | CellKind::Global | CellKind::Buffer) {
        return Err(format!("cannot store into {kind:?}"));
    }
    let ok = match kind {
        CellKind::Local => idx < f.num_locals as usize,
        CellKind::Global => idx < image.num_globals as usize,
        CellKind::FloatConst => idx < image.floats.len(),
        CellKind::Identity => true,
        CellKind::Buffer => {
            let fmt = OpFmt::try_from((idx & 0xf) as u8)
                .map_err(|_| format!("unknown number format {}", idx & 0xf))?;
            (idx >> 4) as u32 <= fmt.bit_size() && p.c as usize + fmt.byte_size() <= MAX_PAYLOAD_SIZE
        }
        CellKind::Special => ValueSpecial::try_from(idx as u8).is_ok() && idx <= 0xff,
        CellKind::RoleProperty => {
            idx < image.roles.len() && OpRoleProperty::try_from(p.c as u8).is_ok()
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("bad {kind:?} cell {idx}"))
    }
}

fn check_role(image: &ImageInfo, idx: u32) -> Result<(), String> {
    if (idx as usize) < image.roles.len() {
        Ok(())
    } else {
        Err(format!("unknown role {idx}"))
    }
}

fn verify_saved(f: &FunctionInfo, d: u32) -> Result<(), String> {
    if d > 0xffff {
        return Err(format!("save mask {d:#x}"));
    }
    if d.count_ones() > f.num_regs as u32 {
        return Err(format!(
            "saves {} registers, frame has {}",
            d.count_ones(),
            f.num_regs
        ));
    }
    Ok(())
}
