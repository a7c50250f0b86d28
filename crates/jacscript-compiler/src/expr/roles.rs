//! Members and methods of roles, registers, events and commands.
//!
//! Everything that talks to the bus lowers to a handful of shapes:
//!
//! - reads: `QUERY_REG` then loads from the packet buffer
//! - writes and commands: arguments into registers, `SETUP_BUFFER`, one
//!   store per field, `SEND_CMD`
//! - waits: `OBSERVE_ROLE` + `YIELD 0` in a loop until the woken packet
//!   carries the expected code
//! - subscriptions: a handler procedure recorded on the role's dispatcher

use jacscript_ast::{ArrowBody, CallExpr, Expr, Ident};
use jacscript_core::format::MAX_PAYLOAD_SIZE;
use jacscript_core::{
    CellKind, CompilationError, OpAsync, OpBinary, OpRoleProperty, OpSync, Span, ValueSpecial,
};
use jacscript_registry::{PacketKind, PacketSpec, builtin, camel_case};

use super::calls::{literal_number, require_args};
use crate::program::{Program, Result};
use crate::scope::OnChange;
use crate::value::Value;

/// Cache validity for reads of registers that may change.
const READ_VALIDITY_MS: u32 = 500;

impl<'c> Program<'c> {
    /// `role.<id>`: a register, event or command of the role's service.
    pub(crate) fn role_member(&mut self, role: usize, member: &Ident<'_>) -> Result<Value<'c>> {
        let catalog = self.catalog;
        let spec = self.roles[role].spec;
        let Some(packet) = catalog.member(spec, member.name) else {
            return Err(self.unknown_member(role, member));
        };
        Ok(match packet.kind {
            PacketKind::Event => Value::Event { role, packet },
            PacketKind::Command => Value::Command { role, packet },
            _ => Value::Register { role, packet },
        })
    }

    fn unknown_member(&self, role: usize, member: &Ident<'_>) -> CompilationError {
        CompilationError::UnknownMember {
            object: self.roles[role].name.clone(),
            member: member.name.to_string(),
            span: member.span,
        }
    }

    /// `obj.<member>(args...)` where `obj` is not `Math`.
    pub(crate) fn emit_method(
        &mut self,
        obj: Value<'c>,
        member: &Ident<'_>,
        call: &CallExpr<'_>,
    ) -> Result<Value<'c>> {
        match (obj, member.name) {
            (Value::Role(role), _) => self.emit_role_method(role, member, call),

            (Value::Event { role, packet } | Value::Command { role, packet }, "sub") => {
                self.require_top_level("sub()")?;
                require_args("sub", call, 1)?;
                let name = format!("{}_{}", self.roles[role].name, packet.name);
                let handler = self.emit_handler(name, &call.args[0], None)?;
                self.dispatcher(role).events.push((packet.identifier, handler));
                self.start_dispatcher(role);
                Ok(Value::Float(0.0))
            }
            (Value::Event { role, packet } | Value::Command { role, packet }, "wait") => {
                require_args("wait", call, 0)?;
                self.emit_event_wait(role, packet.identifier)?;
                Ok(Value::Float(0.0))
            }

            (Value::Register { role, packet }, "read") => {
                require_args("read", call, 0)?;
                self.emit_read(role, packet, call.span)
            }
            (Value::Register { role, packet }, "write") => {
                if packet.kind == PacketKind::Rw {
                    self.emit_send(role, packet, packet.set_code(), call)?;
                    Ok(Value::Float(0.0))
                } else {
                    Err(CompilationError::other(
                        member.span,
                        format!("'{}' is read-only", packet.name),
                    ))
                }
            }
            (Value::Register { role, packet }, "onChange") => {
                self.emit_on_change(role, packet, call)?;
                Ok(Value::Float(0.0))
            }

            (other, name) => Err(CompilationError::UnknownMember {
                object: other.describe().into(),
                member: name.to_string(),
                span: member.span,
            }),
        }
    }

    fn emit_role_method(
        &mut self,
        role: usize,
        member: &Ident<'_>,
        call: &CallExpr<'_>,
    ) -> Result<Value<'c>> {
        match member.name {
            "isConnected" => {
                require_args("isConnected", call, 0)?;
                let r = self.wr().alloc_reg()?;
                self.wr().emit_load_cell(
                    r,
                    CellKind::RoleProperty,
                    role as u32,
                    OpRoleProperty::IsConnected as u32,
                );
                Ok(Value::Reg(r))
            }
            "onConnected" | "onDisconnected" => {
                let connected = member.name == "onConnected";
                self.require_top_level(member.name)?;
                require_args(member.name, call, 1)?;
                let name = format!("{}_{}", self.roles[role].name, member.name);
                let handler = self.emit_handler(name, &call.args[0], None)?;
                let disp = self.dispatcher(role);
                if connected {
                    disp.connected.push(handler);
                } else {
                    disp.disconnected.push(handler);
                }
                self.start_dispatcher(role);
                Ok(Value::Float(0.0))
            }
            "wait" if self.roles[role].spec.class_identifier == builtin::CONDITION => {
                require_args("wait", call, 0)?;
                let catalog = self.catalog;
                let Some(signalled) = catalog.member(self.roles[role].spec, "signalled") else {
                    return Err(self.unknown_member(role, member));
                };
                self.emit_event_wait(role, signalled.identifier)?;
                Ok(Value::Float(0.0))
            }
            _ => match self.role_member(role, member)? {
                Value::Command { packet, .. } => {
                    self.emit_send(role, packet, packet.identifier, call)?;
                    Ok(Value::Float(0.0))
                }
                _ => Err(self.unknown_member(role, member)),
            },
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn emit_query(&mut self, role: usize, packet: &PacketSpec) {
        let validity = if packet.kind == PacketKind::Const {
            0
        } else {
            READ_VALIDITY_MS
        };
        self.wr().emit_async(
            OpAsync::QueryReg,
            role as u32,
            packet.identifier as u32,
            validity,
        );
    }

    /// `reg.read()`. Single-field registers come back in a register; wider
    /// ones stay in the packet buffer as a [`Value::ValueSeq`].
    fn emit_read(&mut self, role: usize, packet: &'c PacketSpec, span: Span) -> Result<Value<'c>> {
        match packet.fields.len() {
            0 => Err(CompilationError::unsupported(
                span,
                format!("'{}' has no fields to read", packet.name),
            )),
            1 => {
                self.wr().push();
                self.wr().alloc_buf()?;
                self.emit_query(role, packet);
                let r = self.wr().alloc_reg()?;
                self.emit_buf_load(r, &packet.fields[0], 0)?;
                self.wr().pop_except(Some(r));
                Ok(Value::Reg(r))
            }
            _ => {
                self.wr().alloc_buf()?;
                self.emit_query(role, packet);
                Ok(Value::ValueSeq { role, packet })
            }
        }
    }

    /// `reg.<field>` on a multi-field register.
    pub(crate) fn emit_field_read(
        &mut self,
        role: usize,
        packet: &'c PacketSpec,
        member: &Ident<'_>,
    ) -> Result<Value<'c>> {
        let mut offset = 0;
        let mut found = None;
        for field in &packet.fields {
            if field.name == member.name || camel_case(&field.name) == member.name {
                found = Some(field);
                break;
            }
            offset += field.byte_size();
        }
        let Some(field) = found else {
            return Err(CompilationError::UnknownMember {
                object: packet.name.clone(),
                member: member.name.to_string(),
                span: member.span,
            });
        };
        self.wr().push();
        self.wr().alloc_buf()?;
        self.emit_query(role, packet);
        let r = self.wr().alloc_reg()?;
        self.emit_buf_load(r, field, offset)?;
        self.wr().pop_except(Some(r));
        Ok(Value::Reg(r))
    }

    // ========================================================================
    // Writes and commands
    // ========================================================================

    /// Pack `call`'s arguments into the buffer and send them as `code`.
    ///
    /// Arguments are evaluated before the buffer is set up since evaluating
    /// one may itself go through the buffer.
    fn emit_send(
        &mut self,
        role: usize,
        packet: &'c PacketSpec,
        code: u16,
        call: &CallExpr<'_>,
    ) -> Result<()> {
        require_args(&packet.name, call, packet.fields.len())?;
        let size = packet.payload_size();
        if size > MAX_PAYLOAD_SIZE {
            return Err(CompilationError::other(
                call.span,
                format!("'{}' payload of {size} bytes is too large", packet.name),
            ));
        }

        self.wr().push();
        let mut vals = Vec::with_capacity(call.args.len());
        for arg in call.args {
            let v = self.emit_expr(arg)?;
            if !v.is_number() {
                return Err(CompilationError::ValueRequired { span: arg.span() });
            }
            vals.push(v);
        }

        self.wr().alloc_buf()?;
        self.wr()
            .emit_sync(OpSync::SetupBuffer, size as u32, 0, 0, 0);
        let mut offset = 0;
        for (v, field) in vals.into_iter().zip(&packet.fields) {
            self.wr().push();
            let r = self.force_reg(v)?;
            self.emit_buf_store(r, field, offset)?;
            self.wr().pop();
            offset += field.byte_size();
        }
        self.wr()
            .emit_async(OpAsync::SendCmd, role as u32, code as u32, 0);
        self.wr().pop();
        Ok(())
    }

    // ========================================================================
    // Waiting and subscriptions
    // ========================================================================

    /// Load `special` from the woken packet and compare it with `code`.
    pub(crate) fn emit_code_check(&mut self, special: ValueSpecial, code: u16) -> Result<u8> {
        self.wr().push();
        let r = self.wr().alloc_reg()?;
        self.wr()
            .emit_load_cell(r, CellKind::Special, special as u32, 0);
        let t = self.wr().alloc_reg()?;
        self.load_float(t, code as f64);
        self.wr().emit_bin(OpBinary::Eq, r, t);
        self.wr().pop_except(Some(r));
        Ok(r)
    }

    /// Block until `role` reports event `code`.
    fn emit_event_wait(&mut self, role: usize, code: u16) -> Result<()> {
        let again = self.wr().mk_label("wait");
        self.wr().emit_label(again);
        self.wr()
            .emit_sync(OpSync::ObserveRole, role as u32, 0, 0, 0);
        self.wr().emit_async(OpAsync::Yield, 0, 0, 0);
        self.wr().push();
        let hit = self.emit_code_check(ValueSpecial::EvCode, code)?;
        self.wr().emit_jump(again, Some(hit));
        self.wr().pop();
        Ok(())
    }

    fn emit_on_change(
        &mut self,
        role: usize,
        packet: &'c PacketSpec,
        call: &CallExpr<'_>,
    ) -> Result<()> {
        self.require_top_level("onChange()")?;
        require_args("onChange", call, 2)?;
        if packet.fields.is_empty() {
            return Err(CompilationError::unsupported(
                call.span,
                format!("'{}' has no value to watch", packet.name),
            ));
        }
        let threshold = literal_number(&call.args[0])?;
        let name = format!("{}_{}_change", self.roles[role].name, packet.name);
        let handler = self.emit_handler(name, &call.args[1], None)?;
        self.roles[role].refresh(packet);
        self.dispatcher(role).on_change.push(OnChange {
            packet,
            threshold,
            handler,
        });
        self.start_dispatcher(role);
        Ok(())
    }

    /// Lower an arrow function into its own procedure.
    ///
    /// With `every` set the body runs in a loop, sleeping that many
    /// milliseconds before each iteration.
    pub(crate) fn emit_handler(
        &mut self,
        name: String,
        handler: &Expr<'_>,
        every: Option<u32>,
    ) -> Result<usize> {
        let Expr::Arrow(arrow) = handler else {
            return Err(CompilationError::unsupported(
                handler.span(),
                "handlers must be arrow functions",
            ));
        };
        if !arrow.params.is_empty() {
            return Err(CompilationError::unsupported(
                arrow.span,
                "handlers take no parameters",
            ));
        }

        tracing::trace!(%name, "handler");
        let proc = self.add_procedure(name, 0);
        let top_level = std::mem::replace(&mut self.top_level, false);
        let res = self.with_procedure(proc, |p| {
            if let Some(ms) = every {
                p.wr().emit_async(OpAsync::Yield, ms + 1, 0, 0);
            }
            match arrow.body {
                ArrowBody::Block(block) => p.emit_block(&block),
                ArrowBody::Expr(expr) => p.emit_expr_stmt(expr, arrow.span),
            }
            if every.is_some() {
                let top = p.wr().top;
                p.wr().emit_jump(top, None);
            }
            let ret = p.wr().ret;
            p.wr().emit_label(ret);
            p.wr().emit_sync(OpSync::Return, 0, 0, 0, 0);
            Ok(())
        });
        self.top_level = top_level;
        res.map(|()| proc)
    }
}
