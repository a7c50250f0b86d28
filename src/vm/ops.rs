//! Instruction execution.
//!
//! [`Vm::step`] executes one word of the current fiber. Prefix words only
//! accumulate operands; every other word consumes and clears them.

use jacscript_core::format::{
    CMD_GET_REG, CMD_REG_MASK, CMD_SET_REG, CMD_TYPE_MASK, Params, js_round, paired_get_code,
};
use jacscript_core::{
    CellKind, NUM_REGS, OpAsync, OpBinary, OpCall, OpFmt, OpMath1, OpMath2, OpRoleProperty,
    OpSync, OpTop, OpUnary, PanicCode, ValueSpecial,
};
use jacscript_registry::builtin;
use rand::Rng;

use super::Vm;
use super::fiber::{Activation, PendingCommand};
use super::strformat::strformat;
use crate::env::Environment;
use crate::packet::Packet;

/// What the fiber does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Parked until its wake time or until its role is woken.
    Suspend,
    /// The outermost activation returned.
    Finished,
    Panic(PanicCode),
}

/// Why a resume stopped abnormally.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fault {
    /// Something a verified image cannot produce.
    Invalid(String),
    /// The environment failed.
    Host(String),
    Panic(PanicCode),
    Timeout { function: usize, steps: usize },
}

impl Fault {
    pub fn invalid(message: impl Into<String>) -> Self {
        Fault::Invalid(message.into())
    }
}

type Step<T> = std::result::Result<T, Fault>;

#[inline]
fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

#[inline]
fn from_bool(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn decode<T: TryFrom<u8>>(raw: u32, what: &str) -> Step<T> {
    u8::try_from(raw)
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| Fault::invalid(format!("invalid {what} {raw}")))
}

fn unary(op: OpUnary, v: f64) -> f64 {
    match op {
        OpUnary::Id => v,
        OpUnary::Neg => -v,
        OpUnary::Not => from_bool(!truthy(v)),
        OpUnary::Abs => v.abs(),
        OpUnary::IsNan => from_bool(v.is_nan()),
    }
}

fn binary(op: OpBinary, a: f64, b: f64) -> f64 {
    match op {
        OpBinary::Add => a + b,
        OpBinary::Sub => a - b,
        OpBinary::Div => a / b,
        OpBinary::Mul => a * b,
        OpBinary::Lt => from_bool(a < b),
        OpBinary::Le => from_bool(a <= b),
        OpBinary::Eq => from_bool(a == b),
        OpBinary::Ne => from_bool(a != b),
        OpBinary::And => {
            if truthy(a) {
                b
            } else {
                a
            }
        }
        OpBinary::Or => {
            if truthy(a) {
                a
            } else {
                b
            }
        }
    }
}

fn math2(op: OpMath2, a: f64, b: f64) -> f64 {
    match op {
        OpMath2::Min => a.min(b),
        OpMath2::Max => a.max(b),
        OpMath2::Pow => a.powf(b),
    }
}

impl<E: Environment> Vm<E> {
    fn frame(&self) -> Step<&Activation> {
        self.current
            .and_then(|i| self.fibers.get(i))
            .and_then(|f| f.frames.last())
            .ok_or_else(|| Fault::invalid("no current activation"))
    }

    fn frame_mut(&mut self) -> Step<&mut Activation> {
        self.current
            .and_then(|i| self.fibers.get_mut(i))
            .and_then(|f| f.frames.last_mut())
            .ok_or_else(|| Fault::invalid("no current activation"))
    }

    fn current_index(&self) -> Step<usize> {
        self.current.ok_or_else(|| Fault::invalid("no current fiber"))
    }

    fn string(&self, index: u32) -> Step<&[u8]> {
        self.image
            .strings
            .get(index as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| Fault::invalid(format!("no string {index}")))
    }

    fn check_role(&self, role: u32) -> Step<usize> {
        let role = role as usize;
        if role < self.roles.len() {
            Ok(role)
        } else {
            Err(Fault::invalid(format!("no role {role}")))
        }
    }

    /// Execute one instruction of the current fiber.
    pub(crate) fn step(&mut self) -> Step<Flow> {
        let frame = self.frame_mut()?;
        let pc = frame.pc;
        frame.pc += 1;
        let instr = self
            .image
            .instr(pc)
            .ok_or_else(|| Fault::invalid(format!("pc {pc} outside the image")))?;
        if self.params.absorb(instr) {
            return Ok(Flow::Continue);
        }
        let p = std::mem::take(&mut self.params).resolve(instr);
        tracing::trace!(pc, op = ?instr.op(), a = p.a, b = p.b, c = p.c, d = p.d, "step");

        let op = instr
            .op()
            .ok_or_else(|| Fault::invalid(format!("invalid opcode {:#06x}", instr.0)))?;
        match op {
            OpTop::Unary => {
                let op = decode(instr.subop() as u32, "unary op")?;
                self.registers[instr.reg1()] = unary(op, self.registers[instr.reg2()]);
            }
            OpTop::Binary => {
                let op = decode(instr.subop() as u32, "binary op")?;
                let (dst, src) = (instr.reg1(), instr.reg2());
                self.registers[dst] = binary(op, self.registers[dst], self.registers[src]);
            }
            OpTop::LoadCell => {
                let v = self.load_cell(p.a, p.b, p.c)?;
                self.registers[instr.subop() as usize] = v;
            }
            OpTop::StoreCell => {
                let v = self.registers[instr.subop() as usize];
                self.store_cell(p.a, p.b, p.c, v)?;
            }
            OpTop::Jump => {
                if instr.jump_if_zero() && truthy(self.registers[instr.subop() as usize]) {
                    return Ok(Flow::Continue);
                }
                let frame = self.frame_mut()?;
                let off = p.b as usize;
                frame.pc = if instr.jump_back() {
                    frame
                        .pc
                        .checked_sub(off)
                        .ok_or_else(|| Fault::invalid("jump before the image"))?
                } else {
                    frame.pc + off
                };
            }
            OpTop::Call => return self.call(instr.subop() as usize, (instr.arg8() >> 6) as u32, p),
            OpTop::Sync => return self.sync_op(instr.arg8() as u32, p),
            OpTop::Async => return self.async_op(instr.arg8() as u32, p),
            OpTop::SetA | OpTop::SetB | OpTop::SetC | OpTop::SetD | OpTop::SetHigh => {
                return Err(Fault::invalid("prefix was not absorbed"));
            }
        }
        Ok(Flow::Continue)
    }

    fn load_cell(&self, kind: u32, idx: u32, c: u32) -> Step<f64> {
        let i = idx as usize;
        let missing = || Fault::invalid(format!("cell {kind}:{idx} out of range"));
        let v = match decode::<CellKind>(kind, "cell kind")? {
            CellKind::Local => *self.frame()?.locals.get(i).ok_or_else(missing)?,
            CellKind::Global => *self.globals.get(i).ok_or_else(missing)?,
            CellKind::FloatConst => *self.image.floats.get(i).ok_or_else(missing)?,
            CellKind::Identity => idx as f64,
            CellKind::Buffer => {
                let fmt: OpFmt = decode(idx & 0xf, "number format")?;
                fmt.load_scaled(&self.pkt.data, c as usize, idx >> 4)
            }
            CellKind::Special => match decode::<ValueSpecial>(idx, "special value")? {
                ValueSpecial::Nan => f64::NAN,
                ValueSpecial::Size => self.pkt.size() as f64,
                ValueSpecial::EvCode => self.pkt.event_code().map_or(f64::NAN, f64::from),
                ValueSpecial::RegGetCode => {
                    if self.pkt.is_reg_get() {
                        (self.pkt.service_command & CMD_REG_MASK) as f64
                    } else {
                        f64::NAN
                    }
                }
                ValueSpecial::RoleId => self.wake_role_idx.map_or(f64::NAN, |r| r as f64),
            },
            CellKind::RoleProperty => {
                let role = self.roles.get(i).ok_or_else(missing)?;
                match decode::<OpRoleProperty>(c, "role property")? {
                    OpRoleProperty::IsConnected => from_bool(role.is_connected()),
                }
            }
        };
        Ok(v)
    }

    fn store_cell(&mut self, kind: u32, idx: u32, c: u32, v: f64) -> Step<()> {
        let i = idx as usize;
        let missing = || Fault::invalid(format!("cell {kind}:{idx} out of range"));
        match decode::<CellKind>(kind, "cell kind")? {
            CellKind::Local => *self.frame_mut()?.locals.get_mut(i).ok_or_else(missing)? = v,
            CellKind::Global => *self.globals.get_mut(i).ok_or_else(missing)? = v,
            CellKind::Buffer => {
                let fmt: OpFmt = decode(idx & 0xf, "number format")?;
                fmt.store_scaled(&mut self.pkt.data, c as usize, idx >> 4, v);
            }
            other => return Err(Fault::invalid(format!("cannot store into {other:?}"))),
        }
        Ok(())
    }

    /// Copy `bytes` into the packet buffer at `off`, growing it as needed
    /// and truncating at the payload limit.
    fn set_buffer(&mut self, bytes: &[u8], off: u32) {
        let limit = self.config.payload_limit;
        let off = off as usize;
        if off > limit {
            return;
        }
        let n = bytes.len().min(limit - off);
        let end = off + n;
        if self.pkt.data.len() < end {
            self.pkt.data.resize(end, 0);
        }
        self.pkt.data[off..end].copy_from_slice(&bytes[..n]);
    }

    fn call(&mut self, numargs: usize, op: u32, p: Params) -> Step<Flow> {
        let op: OpCall = decode(op, "call kind")?;
        let regs = self.registers;
        self.frame_mut()?
            .save_regs(p.d as u16, &regs)
            .map_err(Fault::Invalid)?;
        let function = p.b as usize;
        let args = &regs[..numargs.min(NUM_REGS)];
        if op == OpCall::Sync {
            let info = *self
                .image
                .functions
                .get(function)
                .ok_or_else(|| Fault::invalid(format!("no function {function}")))?;
            let cur = self.current_index()?;
            self.fibers[cur]
                .frames
                .push(Activation::new(function, &info, args));
        } else {
            self.start_fiber(function, args, op)?;
        }
        Ok(Flow::Continue)
    }

    fn sync_op(&mut self, op: u32, p: Params) -> Step<Flow> {
        let nargs = (p.b as usize).min(NUM_REGS);
        match decode::<OpSync>(op, "sync op")? {
            OpSync::Return => return self.ret(),
            OpSync::SetupBuffer => {
                let size = p.a as usize;
                if size > self.config.payload_limit {
                    return Err(Fault::invalid(format!("buffer of {size} bytes")));
                }
                self.pkt.data = vec![0; size];
            }
            OpSync::ObserveRole => {
                let role = self.check_role(p.a)?;
                let cur = self.current_index()?;
                self.fibers[cur].waiting_on_role = Some(role);
            }
            OpSync::Format => {
                let out = strformat(self.string(p.a)?, &self.registers[..nargs]);
                self.set_buffer(&out, p.c);
            }
            OpSync::Memcpy => {
                let s = self.string(p.a)?.to_vec();
                self.set_buffer(&s, p.c);
            }
            OpSync::LogFormat => {
                let out = strformat(self.string(p.a)?, &self.registers[..nargs]);
                self.env.log(&String::from_utf8_lossy(&out));
            }
            OpSync::Math1 => {
                let r0 = self.registers[0];
                self.registers[0] = match decode::<OpMath1>(p.a, "math op")? {
                    OpMath1::Floor => r0.floor(),
                    OpMath1::Round => js_round(r0),
                    OpMath1::Ceil => r0.ceil(),
                    OpMath1::LogE => r0.ln(),
                    OpMath1::Random => r0 * self.rng.r#gen::<f64>(),
                };
            }
            OpSync::Math2 => {
                let op = decode(p.a, "math op")?;
                self.registers[0] = math2(op, self.registers[0], self.registers[1]);
            }
            OpSync::Panic => return Ok(Flow::Panic(PanicCode::from_script(p.a))),
        }
        Ok(Flow::Continue)
    }

    /// Pop the current activation; the outermost one finishes the fiber.
    fn ret(&mut self) -> Step<Flow> {
        let cur = self.current_index()?;
        let fiber = &mut self.fibers[cur];
        if fiber.frames.len() <= 1 {
            return Ok(Flow::Finished);
        }
        fiber.frames.pop();
        if let Some(caller) = fiber.frames.last_mut() {
            caller.restore_regs(&mut self.registers);
        }
        Ok(Flow::Continue)
    }

    fn async_op(&mut self, op: u32, p: Params) -> Step<Flow> {
        let op: OpAsync = decode(op, "async op")?;
        let regs = self.registers;
        self.frame_mut()?
            .save_regs(p.d as u16, &regs)
            .map_err(Fault::Invalid)?;
        let now = self.env.now();
        let cur = self.current_index()?;
        match op {
            OpAsync::Yield => {
                self.fibers[cur].wake_at = (p.a != 0).then(|| now + p.a as u64);
                Ok(Flow::Suspend)
            }
            OpAsync::CloudUpload => {
                let label = String::from_utf8_lossy(&self.pkt.data)
                    .trim_end_matches('\0')
                    .to_string();
                let n = (p.a as usize).min(NUM_REGS);
                self.env.cloud_upload(&label, &regs[..n]);
                let (lo, hi) = self.config.upload_backoff;
                let pause = self.rng.gen_range(lo..=hi);
                self.fibers[cur].wake_at = Some(now + pause);
                Ok(Flow::Suspend)
            }
            OpAsync::SendCmd => self.send_cmd(p.a, p.b as u16),
            OpAsync::QueryReg => self.query_reg(p.a, p.b as u16 | CMD_GET_REG, p.c),
        }
    }

    fn send_cmd(&mut self, role: u32, code: u16) -> Step<Flow> {
        let role = self.check_role(role)?;
        if self.roles[role].local {
            if code == builtin::CONDITION_SIGNAL {
                self.local_events.push(role);
            }
            return Ok(Flow::Continue);
        }
        if code & CMD_TYPE_MASK == CMD_SET_REG {
            self.cache.invalidate(role, paired_get_code(code));
        }
        let now = self.env.now();
        let cur = self.current_index()?;
        let fiber = &mut self.fibers[cur];
        fiber.waiting_on_role = Some(role);
        fiber.command = Some(PendingCommand {
            role,
            code,
            payload: Some(self.pkt.data.clone()),
            argument: None,
            resend: self.config.resend_initial,
        });
        fiber.wake_at = Some(now);
        Ok(Flow::Suspend)
    }

    fn query_reg(&mut self, role: u32, code: u16, validity: u32) -> Step<Flow> {
        let role = self.check_role(role)?;
        let now = self.env.now();
        if let Some(b) = self.roles[role].binding {
            let validity = match validity {
                0 => self.config.default_validity,
                ms => ms as u64,
            };
            if let Some(hit) = self.cache.lookup(role, code, None, now, validity) {
                self.pkt = Packet::report(b.device, b.service_index, code, hit.value.clone());
                return Ok(Flow::Continue);
            }
        }
        let cur = self.current_index()?;
        let fiber = &mut self.fibers[cur];
        fiber.waiting_on_role = Some(role);
        fiber.command = Some(PendingCommand {
            role,
            code,
            payload: None,
            argument: None,
            resend: self.config.resend_initial,
        });
        fiber.wake_at = Some(now);
        Ok(Flow::Suspend)
    }
}
