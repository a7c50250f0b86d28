//! Role dispatchers and the auto-refresh loop.
//!
//! Subscriptions made while lowering main are only recorded on the role's
//! [`Dispatcher`]. Once main is done, every dispatcher becomes a procedure
//! that observes its role forever and starts the matching handlers:
//!
//! ```text
//! connected = role.isConnected
//! if connected: start every onConnected handler
//! loop:
//!     OBSERVE_ROLE role; YIELD 0
//!     connection changed?  -> onConnected / onDisconnected handlers
//!     EV_CODE == code?      -> event handler
//!     REG_GET_CODE == reg and the value moved past the threshold?
//!                           -> onChange handler
//! ```
//!
//! Handlers are started with `BG_MAX1_PEND1`, so a handler that is still
//! running when its trigger fires again runs once more afterwards.

use jacscript_core::format::{CMD_GET_REG, CMD_SET_REG, system_reg};
use jacscript_core::{
    CellKind, OpAsync, OpBinary, OpCall, OpFmt, OpRoleProperty, OpSync, OpUnary, ValueSpecial,
};

use crate::program::{Program, Result};
use crate::scope::Dispatcher;

/// Period of the auto-refresh loop.
const REFRESH_PERIOD_MS: u32 = 521;

/// Samples requested from a streaming sensor per refresh.
const STREAMING_SAMPLES: u32 = 255;

impl<'c> Program<'c> {
    /// Generate the auto-refresh procedure and every role's dispatcher.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn emit_dispatchers(&mut self) {
        let refresh = if self.roles.iter().any(|r| !r.refreshed.is_empty()) {
            let proc = self.add_procedure("_autoRefresh_", 0);
            if let Err(err) = self.with_procedure(proc, |p| p.emit_auto_refresh()) {
                self.report(err);
            }
            Some(proc)
        } else {
            None
        };

        for role in 0..self.roles.len() {
            let Some(disp) = self.roles[role].dispatcher.take() else {
                continue;
            };
            tracing::trace!(
                role = %self.roles[role].name,
                events = disp.events.len(),
                on_change = disp.on_change.len(),
                "dispatcher"
            );
            let start_refresh = refresh.filter(|_| !self.roles[role].refreshed.is_empty());
            if let Err(err) =
                self.with_procedure(disp.proc, |p| p.emit_dispatcher(role, &disp, start_refresh))
            {
                self.report(err);
            }
            self.roles[role].dispatcher = Some(disp);
        }
    }

    fn emit_auto_refresh(&mut self) -> Result<()> {
        let top = self.wr().top;
        for role in 0..self.roles.len() {
            if self.roles[role].refreshed.is_empty() {
                continue;
            }
            let skip = self.wr().mk_label("not_connected");
            self.wr().push();
            let r = self.load_connected(role)?;
            self.wr().emit_jump(skip, Some(r));
            self.wr().pop();

            let spec = self.roles[role].spec;
            for i in 0..self.roles[role].refreshed.len() {
                let packet = self.roles[role].refreshed[i];
                if spec.is_sensor() && packet.identifier == system_reg::READING {
                    self.emit_streaming_request(role)?;
                } else {
                    // fire and forget; the dispatcher sees the report
                    self.wr().push();
                    self.wr().alloc_buf()?;
                    self.wr().emit_sync(OpSync::SetupBuffer, 0, 0, 0, 0);
                    self.wr().emit_async(
                        OpAsync::SendCmd,
                        role as u32,
                        (packet.identifier | CMD_GET_REG) as u32,
                        0,
                    );
                    self.wr().pop();
                }
            }
            self.wr().emit_label(skip);
        }
        self.wr()
            .emit_async(OpAsync::Yield, REFRESH_PERIOD_MS, 0, 0);
        self.wr().emit_jump(top, None);
        let ret = self.wr().ret;
        self.wr().emit_label(ret);
        self.wr().emit_sync(OpSync::Return, 0, 0, 0, 0);
        Ok(())
    }

    /// Ask a sensor to keep streaming its reading.
    fn emit_streaming_request(&mut self, role: usize) -> Result<()> {
        self.wr().push();
        self.wr().alloc_buf()?;
        self.wr().emit_sync(OpSync::SetupBuffer, 1, 0, 0, 0);
        let n = self.wr().alloc_reg()?;
        self.load_float(n, STREAMING_SAMPLES as f64);
        self.wr()
            .emit_store_cell(n, CellKind::Buffer, OpFmt::U8 as u32, 0);
        self.wr().emit_async(
            OpAsync::SendCmd,
            role as u32,
            (system_reg::STREAMING_SAMPLES | CMD_SET_REG) as u32,
            0,
        );
        self.wr().pop();
        Ok(())
    }

    fn load_connected(&mut self, role: usize) -> Result<u8> {
        let r = self.wr().alloc_reg()?;
        self.wr().emit_load_cell(
            r,
            CellKind::RoleProperty,
            role as u32,
            OpRoleProperty::IsConnected as u32,
        );
        Ok(r)
    }

    fn emit_handler_calls(&mut self, handlers: &[usize]) {
        for &h in handlers {
            self.wr().emit_call(h, 0, OpCall::BgMax1Pend1);
        }
    }

    fn emit_dispatcher(
        &mut self,
        role: usize,
        disp: &Dispatcher<'c>,
        refresh: Option<usize>,
    ) -> Result<()> {
        if let Some(proc) = refresh {
            self.wr().emit_call(proc, 0, OpCall::BgMax1);
        }

        // prologue: remember the connection state, fire onConnected if up
        let connected = self.cur().locals.add_hidden("connected");
        self.wr().push();
        let r = self.load_connected(role)?;
        self.wr()
            .emit_store_cell(r, CellKind::Local, connected, 0);
        if !disp.connected.is_empty() {
            let skip = self.wr().mk_label("skip_connected");
            self.wr().emit_jump(skip, Some(r));
            self.emit_handler_calls(&disp.connected);
            self.wr().emit_label(skip);
        }
        self.wr().pop();

        let mut prev = Vec::with_capacity(disp.on_change.len());
        for change in &disp.on_change {
            let idx = self
                .cur()
                .locals
                .add_hidden(&format!("{}_prev", change.packet.name));
            self.wr()
                .emit_load_cell(0, CellKind::Special, ValueSpecial::Nan as u32, 0);
            self.wr().emit_store_cell(0, CellKind::Local, idx, 0);
            prev.push(idx);
        }

        let again = self.wr().mk_label("observe");
        self.wr().emit_label(again);
        self.wr()
            .emit_sync(OpSync::ObserveRole, role as u32, 0, 0, 0);
        self.wr().emit_async(OpAsync::Yield, 0, 0, 0);

        if !disp.connected.is_empty() || !disp.disconnected.is_empty() {
            self.emit_connection_check(role, connected, disp)?;
        }

        for &(code, handler) in &disp.events {
            let skip = self.wr().mk_label("skip_event");
            self.wr().push();
            let hit = self.emit_code_check(ValueSpecial::EvCode, code)?;
            self.wr().emit_jump(skip, Some(hit));
            self.wr().pop();
            self.wr().emit_call(handler, 0, OpCall::BgMax1Pend1);
            self.wr().emit_label(skip);
        }

        for (change, prev) in disp.on_change.iter().zip(prev) {
            let skip = self.wr().mk_label("skip_change");
            self.wr().push();
            let hit = self.emit_code_check(ValueSpecial::RegGetCode, change.packet.identifier)?;
            self.wr().emit_jump(skip, Some(hit));

            let v = self.wr().alloc_reg()?;
            self.emit_buf_load(v, &change.packet.fields[0], 0)?;
            let d = self.wr().alloc_reg()?;
            self.wr().emit_load_cell(d, CellKind::Local, prev, 0);
            self.wr().emit_bin(OpBinary::Sub, d, v);
            self.wr().emit_unary(OpUnary::Abs, d, d);
            let t = self.wr().alloc_reg()?;
            self.load_float(t, change.threshold);
            self.wr().emit_bin(OpBinary::Le, d, t);
            // NaN compares false, so the first report always fires
            self.wr().emit_unary(OpUnary::Not, d, d);
            self.wr().emit_jump(skip, Some(d));
            self.wr().emit_store_cell(v, CellKind::Local, prev, 0);
            self.wr().pop();

            self.wr().emit_call(change.handler, 0, OpCall::BgMax1Pend1);
            self.wr().emit_label(skip);
        }

        self.wr().emit_jump(again, None);
        let ret = self.wr().ret;
        self.wr().emit_label(ret);
        self.wr().emit_sync(OpSync::Return, 0, 0, 0, 0);
        Ok(())
    }

    fn emit_connection_check(
        &mut self,
        role: usize,
        connected: u32,
        disp: &Dispatcher<'c>,
    ) -> Result<()> {
        let unchanged = self.wr().mk_label("unchanged");
        let down = self.wr().mk_label("disconnected");

        self.wr().push();
        let now = self.load_connected(role)?;
        let changed = self.wr().alloc_reg()?;
        self.wr()
            .emit_load_cell(changed, CellKind::Local, connected, 0);
        self.wr().emit_bin(OpBinary::Ne, changed, now);
        self.wr().emit_jump(unchanged, Some(changed));
        self.wr()
            .emit_store_cell(now, CellKind::Local, connected, 0);
        self.wr().emit_jump(down, Some(now));
        self.wr().pop();

        self.emit_handler_calls(&disp.connected);
        self.wr().emit_jump(unchanged, None);
        self.wr().emit_label(down);
        self.emit_handler_calls(&disp.disconnected);
        self.wr().emit_label(unchanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;
    use jacscript_ast::AstBuilder;
    use jacscript_core::format::Params;
    use jacscript_core::{Instr, OpAsync, OpCall, OpSync, OpTop};
    use jacscript_registry::ServiceCatalog;

    use crate::{CompilationResult, CompileOptions, compile};

    fn decode(code: &[u16]) -> Vec<(Instr, Params)> {
        let mut out = Vec::new();
        let mut p = Params::default();
        for &w in code {
            let i = Instr(w);
            if p.absorb(i) {
                continue;
            }
            out.push((i, p.resolve(i)));
            p = Params::default();
        }
        out
    }

    fn function<'r>(res: &'r CompilationResult, name: &str) -> Vec<(Instr, Params)> {
        let f = res
            .functions
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function {name}"));
        decode(&f.code)
    }

    fn calls(code: &[(Instr, Params)]) -> Vec<(u32, OpCall)> {
        code.iter()
            .filter(|(i, _)| i.op() == Some(OpTop::Call))
            .map(|(i, p)| (p.b, OpCall::try_from((i.arg8() >> 6) as u8).unwrap()))
            .collect()
    }

    #[test]
    fn event_handlers_are_started_pending() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.expr_stmt(b.call(b.path("btn.pressed.sub"), &[b.arrow(&[], &[])])),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        let disp = function(&res, "btn_disp");
        let handler = res.functions.iter().position(|f| f.name == "btn_pressed").unwrap();
        assert_eq!(calls(&disp), vec![(handler as u32, OpCall::BgMax1Pend1)]);
        assert!(
            disp.iter()
                .any(|(i, _)| i.op() == Some(OpTop::Sync) && i.arg8() == OpSync::ObserveRole as u16)
        );
        // main only starts the dispatcher
        let disp_index = res.functions.iter().position(|f| f.name == "btn_disp").unwrap();
        assert_eq!(
            calls(&function(&res, "main")),
            vec![(disp_index as u32, OpCall::BgMax1)]
        );
    }

    #[test]
    fn dispatcher_is_shared_by_subscriptions() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.expr_stmt(b.call(b.path("btn.pressed.sub"), &[b.arrow(&[], &[])])),
            b.expr_stmt(b.call(b.path("btn.released.sub"), &[b.arrow(&[], &[])])),
            b.expr_stmt(b.call(b.path("btn.onConnected"), &[b.arrow(&[], &[])])),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        assert_eq!(
            res.functions.iter().filter(|f| f.name.ends_with("_disp")).count(),
            1
        );
        // onConnected fires from the prologue and on reconnect
        let disp = function(&res, "btn_disp");
        let connected = res
            .functions
            .iter()
            .position(|f| f.name == "btn_onConnected")
            .unwrap() as u32;
        let starts = calls(&disp).iter().filter(|(f, _)| *f == connected).count();
        assert_eq!(starts, 2);
        assert_eq!(res.functions.iter().find(|f| f.name == "btn_disp").unwrap().num_locals, 1);
    }

    #[test]
    fn sensor_reading_is_refreshed_by_streaming() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("t", Some(b.call(b.path("roles.thermometer"), &[]))),
            b.expr_stmt(b.call(
                b.path("t.temperature.onChange"),
                &[b.num(1.0), b.arrow(&[], &[])],
            )),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        let refresh = function(&res, "_autoRefresh_");
        let send = refresh
            .iter()
            .find(|(i, _)| i.op() == Some(OpTop::Async) && i.arg8() == OpAsync::SendCmd as u16)
            .map(|(_, p)| p.b);
        assert_eq!(send, Some(0x2003));
        let sleep = refresh
            .iter()
            .find(|(i, _)| i.op() == Some(OpTop::Async) && i.arg8() == OpAsync::Yield as u16)
            .map(|(_, p)| p.a);
        assert_eq!(sleep, Some(521));
        assert_eq!(res.functions.last().unwrap().name, "_autoRefresh_");
    }

    #[test]
    fn refresh_gets_are_sent_only_to_connected_roles() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("s", Some(b.call(b.path("roles.servo"), &[]))),
            b.var("t", Some(b.call(b.path("roles.servo"), &[]))),
            b.expr_stmt(b.call(b.path("s.angle.onChange"), &[b.num(1.0), b.arrow(&[], &[])])),
            b.expr_stmt(b.call(b.path("t.angle.onChange"), &[b.num(1.0), b.arrow(&[], &[])])),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        let refresh = function(&res, "_autoRefresh_");
        let is_async = |i: &Instr, op: OpAsync| i.op() == Some(OpTop::Async) && i.arg8() == op as u16;
        assert!(!refresh.iter().any(|(i, _)| is_async(i, OpAsync::QueryReg)));

        let sends: Vec<usize> = refresh
            .iter()
            .enumerate()
            .filter(|(_, (i, _))| is_async(i, OpAsync::SendCmd))
            .map(|(n, _)| n)
            .collect();
        assert_eq!(sends.len(), 2);
        let mut from = 0;
        for (role, &at) in sends.iter().enumerate() {
            let p = &refresh[at].1;
            assert_eq!((p.a, p.b), (role as u32, 0x1002));
            // each get sits behind its own connection check
            assert!(
                refresh[from..at]
                    .iter()
                    .any(|(i, _)| i.op() == Some(OpTop::Jump) && i.jump_if_zero())
            );
            from = at + 1;
        }
    }

    #[test]
    fn on_change_tracks_previous_value() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let script = b.script(&[
            b.var("p", Some(b.call(b.path("roles.potentiometer"), &[]))),
            b.expr_stmt(b.call(
                b.path("p.position.onChange"),
                &[b.num(0.1), b.arrow(&[], &[])],
            )),
        ]);
        let res = compile(&script, &ServiceCatalog::with_builtins(), CompileOptions::new());
        assert!(res.is_success(), "{:?}", res.errors);
        let f = res.functions.iter().find(|f| f.name == "p_disp").unwrap();
        // "connected" and the previous position
        assert_eq!(f.num_locals, 2);
        let disp = decode(&f.code);
        let refresh = res.functions.iter().position(|f| f.name == "_autoRefresh_").unwrap();
        assert_eq!(calls(&disp)[0], (refresh as u32, OpCall::BgMax1));
    }
}
