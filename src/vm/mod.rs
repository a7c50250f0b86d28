//! The Jacscript virtual machine.
//!
//! A [`Vm`] runs one image against an [`Environment`]. Script code runs in
//! cooperative fibers; a fiber runs until it suspends on an async
//! instruction and is resumed when its wake time passes or when a packet
//! arrives for the role it observes. Nothing runs in the background: the
//! host drives the VM by delivering bus traffic and calling [`Vm::tick`] at
//! [`Vm::next_deadline`].
//!
//! ## Modules
//!
//! - `ops`: instruction execution
//! - `fiber`: fibers, activations and register saving
//! - `cache`: cached register values
//! - `binder`: roles and automatic binding
//! - `strformat`: `{N}` templates

mod binder;
mod cache;
mod fiber;
mod ops;
mod strformat;

pub use binder::Binding;

use jacscript_core::format::Params;
use jacscript_core::{ImageInfo, NUM_REGS, OpCall, PanicCode, verify};
use jacscript_registry::builtin;
use rand::SeedableRng;
use rand_pcg::Pcg32;

use crate::config::VmConfig;
use crate::env::Environment;
use crate::error::{Result, VmError};
use crate::packet::{DeviceId, Packet};
use binder::Role;
use cache::{CachedRegister, RegisterCache};
use fiber::{Activation, Fiber};
use ops::{Fault, Flow};

/// A loaded program and its running state.
pub struct Vm<E: Environment> {
    image: ImageInfo,
    env: E,
    config: VmConfig,
    registers: [f64; NUM_REGS],
    /// Prefix operands collected for the next instruction.
    params: Params,
    globals: Vec<f64>,
    roles: Vec<Role>,
    /// The packet the current fiber sees: the one that woke it, a cached
    /// register value, or the buffer it is building.
    pkt: Packet,
    wake_role_idx: Option<usize>,
    fibers: Vec<Fiber>,
    /// Index of the running fiber.
    current: Option<usize>,
    next_fiber_id: u32,
    cache: RegisterCache,
    rng: Pcg32,
    panic: Option<PanicCode>,
    next_autobind: u64,
    /// Local roles signalled during the current run.
    local_events: Vec<usize>,
    /// First execution timeout seen during the current host call.
    timeout: Option<VmError>,
}

impl<E: Environment> Vm<E> {
    /// Load and verify `image`. The program does not run until
    /// [`Vm::start`].
    pub fn new(image: &[u8], env: E, config: VmConfig) -> Result<Self> {
        let image = ImageInfo::load(image)?;
        verify(&image)?;
        let roles = image
            .roles
            .iter()
            .map(|r| Role::new(r.class_id, r.class_id == builtin::CONDITION))
            .collect();
        let rng = match config.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_entropy(),
        };
        let next_autobind = env.now() + config.autobind_interval;
        Ok(Vm {
            globals: vec![0.0; image.num_globals as usize],
            cache: RegisterCache::new(config.cache_capacity),
            image,
            env,
            config,
            registers: [0.0; NUM_REGS],
            params: Params::default(),
            roles,
            pkt: Packet::default(),
            wake_role_idx: None,
            fibers: Vec::new(),
            current: None,
            next_fiber_id: 0,
            rng,
            panic: None,
            next_autobind,
            local_events: Vec::new(),
            timeout: None,
        })
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn into_env(self) -> E {
        self.env
    }

    pub fn image(&self) -> &ImageInfo {
        &self.image
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The latched panic, if the program has stopped.
    pub fn panic_code(&self) -> Option<PanicCode> {
        self.panic
    }

    pub fn globals(&self) -> &[f64] {
        &self.globals
    }

    pub fn num_fibers(&self) -> usize {
        self.fibers.len()
    }

    /// Where role `index` is bound, if it is.
    pub fn role_binding(&self, index: usize) -> Option<Binding> {
        self.roles.get(index).and_then(|r| r.binding)
    }

    pub fn is_role_connected(&self, index: usize) -> bool {
        self.roles.get(index).is_some_and(Role::is_connected)
    }

    /// Number of live cached register values.
    pub fn cached_registers(&self) -> usize {
        self.cache.live()
    }

    /// Run main.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn start(&mut self) -> Result<()> {
        if self.panic.is_some() {
            return Ok(());
        }
        tracing::info!(
            functions = self.image.functions.len(),
            roles = self.roles.len(),
            "program started"
        );
        if let Err(fault) = self.start_fiber(0, &[], OpCall::Bg) {
            return Err(self.fail(fault));
        }
        let res = self.settle();
        self.take_timeout(res)
    }

    /// Drop all program state and bindings, as if the image had just been
    /// loaded.
    pub fn reset(&mut self) {
        for role in &mut self.roles {
            role.binding = None;
        }
        self.globals.fill(0.0);
        self.registers = [0.0; NUM_REGS];
        self.params = Params::default();
        self.pkt = Packet::default();
        self.wake_role_idx = None;
        self.fibers.clear();
        self.current = None;
        self.cache = RegisterCache::new(self.config.cache_capacity);
        self.panic = None;
        self.local_events.clear();
        self.timeout = None;
        self.next_autobind = self.env.now() + self.config.autobind_interval;
        tracing::info!("program reset");
    }

    /// Earliest time [`Vm::tick`] has work to do. `None` once panicked.
    pub fn next_deadline(&self) -> Option<u64> {
        if self.panic.is_some() {
            return None;
        }
        let fibers = self.fibers.iter().filter_map(|f| f.wake_at);
        Some(fibers.fold(self.next_autobind, u64::min))
    }

    /// Run every fiber whose wake time has passed and bind roles when the
    /// bind interval has elapsed.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn tick(&mut self) -> Result<()> {
        if self.panic.is_some() {
            return Ok(());
        }
        let now = self.env.now();
        let mut res = Ok(());
        if now >= self.next_autobind {
            self.next_autobind = now + self.config.autobind_interval;
            res = self.autobind();
        }
        let res = res.and_then(|()| self.settle());
        self.take_timeout(res)
    }

    /// Deliver a packet from the bus.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn process_packet(&mut self, pkt: Packet) -> Result<()> {
        if self.panic.is_some() {
            return Ok(());
        }
        tracing::trace!(%pkt, "packet");
        let now = self.env.now();
        let mut res = Ok(());
        for idx in 0..self.roles.len() {
            if self.roles[idx].receives(&pkt) {
                self.cache.update_with(idx, &pkt, now);
                self.pkt = pkt.clone();
                res = self.wake_role(idx);
                if res.is_err() {
                    break;
                }
            }
        }
        let res = res.and_then(|()| self.settle());
        self.take_timeout(res)
    }

    /// A device appeared; bind roles to it right away.
    pub fn device_connected(&mut self, device: DeviceId) -> Result<()> {
        if self.panic.is_some() {
            return Ok(());
        }
        tracing::debug!(%device, "device connected");
        let res = self.autobind().and_then(|()| self.settle());
        self.take_timeout(res)
    }

    /// A device left the bus. Its roles are unbound, their cached values
    /// dropped, and fibers observing them are woken.
    pub fn device_disconnected(&mut self, device: DeviceId) -> Result<()> {
        if self.panic.is_some() {
            return Ok(());
        }
        tracing::debug!(%device, "device disconnected");
        let mut res = Ok(());
        for idx in binder::unbind_device(&mut self.roles, device) {
            self.cache.detach_role(idx);
            if res.is_ok() {
                self.pkt = Packet {
                    device,
                    ..Packet::default()
                };
                res = self.wake_role(idx);
            }
        }
        let res = res.and_then(|()| self.settle());
        self.take_timeout(res)
    }

    /// Finish a host call: a fatal error wins, otherwise report the first
    /// timeout of the call.
    fn take_timeout(&mut self, res: Result<()>) -> Result<()> {
        let timeout = self.timeout.take();
        res?;
        timeout.map_or(Ok(()), Err)
    }

    fn autobind(&mut self) -> Result<()> {
        let mut devices = self.env.devices();
        for idx in binder::autobind(&mut self.roles, &mut devices) {
            self.pkt = Packet::default();
            self.wake_role(idx)?;
        }
        Ok(())
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Run due fibers and deliver local events until nothing is left to do
    /// at the current time.
    fn settle(&mut self) -> Result<()> {
        loop {
            for role in std::mem::take(&mut self.local_events) {
                let code = builtin::CONDITION_SIGNALLED as u8;
                self.pkt = Packet::event(DeviceId::default(), 0, code, Vec::new());
                self.wake_role(role)?;
            }
            self.wake_fibers()?;
            if self.local_events.is_empty() || self.panic.is_some() {
                return Ok(());
            }
        }
    }

    /// Run fibers whose wake time has passed, rescanning until none is due.
    fn wake_fibers(&mut self) -> Result<()> {
        self.pkt = Packet::default();
        loop {
            let now = self.env.now();
            let due: Vec<u32> = self
                .fibers
                .iter()
                .filter(|f| f.is_due(now))
                .map(|f| f.id)
                .collect();
            if due.is_empty() {
                return Ok(());
            }
            for id in due {
                if self.panic.is_some() {
                    return Ok(());
                }
                match self.fiber_index(id) {
                    Some(idx) if self.fibers[idx].is_due(now) => self.run(idx)?,
                    _ => {}
                }
            }
        }
    }

    /// Run every fiber observing `role`, in start order, with the current
    /// packet.
    fn wake_role(&mut self, role: usize) -> Result<()> {
        let pkt = self.pkt.clone();
        let waiting: Vec<u32> = self
            .fibers
            .iter()
            .filter(|f| f.waiting_on_role == Some(role))
            .map(|f| f.id)
            .collect();
        for id in waiting {
            let Some(idx) = self.fiber_index(id) else {
                continue;
            };
            if self.fibers[idx].waiting_on_role != Some(role) {
                continue;
            }
            self.pkt = pkt.clone();
            self.wake_role_idx = Some(role);
            let res = self.run(idx);
            self.wake_role_idx = None;
            res?;
        }
        Ok(())
    }

    fn fiber_index(&self, id: u32) -> Option<usize> {
        self.fibers.iter().position(|f| f.id == id)
    }

    pub(crate) fn start_fiber(
        &mut self,
        function: usize,
        args: &[f64],
        op: OpCall,
    ) -> std::result::Result<(), Fault> {
        let info = *self
            .image
            .functions
            .get(function)
            .ok_or_else(|| Fault::invalid(format!("no function {function}")))?;
        if op != OpCall::Bg {
            if let Some(f) = self.fibers.iter_mut().find(|f| f.first_fun == function) {
                if op == OpCall::BgMax1Pend1 {
                    f.pending = true;
                }
                return Ok(());
            }
        }
        let id = self.next_fiber_id;
        self.next_fiber_id = self.next_fiber_id.wrapping_add(1);
        tracing::debug!(function, fiber = id, "fiber started");
        let now = self.env.now();
        self.fibers.push(Fiber::new(
            id,
            function,
            Activation::new(function, &info, args),
            now,
        ));
        Ok(())
    }

    // ========================================================================
    // Running a fiber
    // ========================================================================

    /// Resume fiber `idx` until it suspends, finishes or fails.
    fn run(&mut self, idx: usize) -> Result<()> {
        if self.panic.is_some() {
            return Ok(());
        }
        let outcome = self.run_fiber(idx);
        self.current = None;
        self.params = Params::default();
        match outcome {
            Ok(()) => Ok(()),
            Err(Fault::Timeout { function, steps }) => {
                tracing::warn!(function, steps, "execution timeout");
                if idx < self.fibers.len() {
                    self.fibers.remove(idx);
                }
                // the other fibers still get to run
                self.timeout
                    .get_or_insert(VmError::Timeout { function, steps });
                Ok(())
            }
            Err(fault) => Err(self.fail(fault)),
        }
    }

    /// Latch the panic a fault implies and turn it into the error reported
    /// to the host.
    fn fail(&mut self, fault: Fault) -> VmError {
        let (code, err) = match fault {
            Fault::Panic(code) => (code, VmError::Panic(code)),
            Fault::Invalid(message) => {
                tracing::error!(%message, "internal error");
                (PanicCode::Internal, VmError::Panic(PanicCode::Internal))
            }
            Fault::Host(message) => {
                tracing::error!(%message, "environment failure");
                (PanicCode::Internal, VmError::Host(message))
            }
            Fault::Timeout { function, steps } => (
                PanicCode::Internal,
                VmError::Timeout { function, steps },
            ),
        };
        if self.panic.is_none() {
            tracing::info!(code = code.code(), "{code}");
            self.panic = Some(code);
        }
        err
    }

    fn run_fiber(&mut self, idx: usize) -> std::result::Result<(), Fault> {
        if !self.resume(idx)? {
            return Ok(());
        }
        let budget = self.config.step_budget;
        let mut steps = 0;
        loop {
            match self.step()? {
                Flow::Continue => {}
                Flow::Suspend => return Ok(()),
                Flow::Finished => {
                    if !self.finish(idx) {
                        return Ok(());
                    }
                }
                Flow::Panic(code) => return Err(Fault::Panic(code)),
            }
            steps += 1;
            if steps >= budget {
                let function = self.fibers[idx]
                    .frames
                    .last()
                    .map_or(self.fibers[idx].first_fun, |f| f.function);
                return Err(Fault::Timeout { function, steps });
            }
        }
    }

    /// Make fiber `idx` current. Returns `false` if it has to keep waiting
    /// on its pending command.
    fn resume(&mut self, idx: usize) -> std::result::Result<bool, Fault> {
        if self.prelude(idx)? {
            return Ok(false);
        }
        let fiber = &mut self.fibers[idx];
        fiber.wake_at = None;
        fiber.waiting_on_role = None;
        if let Some(frame) = fiber.frame() {
            frame.restore_regs(&mut self.registers);
        }
        self.current = Some(idx);
        Ok(true)
    }

    /// Service the fiber's pending command. Returns `true` while the fiber
    /// must stay suspended.
    fn prelude(&mut self, idx: usize) -> std::result::Result<bool, Fault> {
        let now = self.env.now();
        let fiber = &mut self.fibers[idx];
        let Some(cmd) = fiber.command.as_mut() else {
            return Ok(false);
        };
        let role = &self.roles[cmd.role];
        if role.binding.is_none() {
            // wait for the role to be bound again
            fiber.wake_at = None;
            return Ok(true);
        }

        if let Some(payload) = cmd.payload.take() {
            if let Some(pkt) = role.command(cmd.code, payload) {
                tracing::debug!(role = cmd.role, %pkt, "command");
                self.env.send(&pkt).map_err(|e| Fault::Host(e.to_string()))?;
            }
            fiber.command = None;
            return Ok(false);
        }

        if self.pkt.is_report() && self.pkt.service_command == cmd.code && role.receives(&self.pkt) {
            let mut entry = CachedRegister::new(cmd.role, cmd.code, cmd.argument.clone());
            if entry.update_with(cmd.role, &self.pkt, now) {
                self.cache.add(entry);
                fiber.command = None;
                return Ok(false);
            }
        }

        if fiber.wake_at.is_none_or(|t| now >= t) {
            let data = cmd.argument.clone().unwrap_or_default();
            let delay = cmd.resend;
            cmd.resend = (cmd.resend * 2).min(self.config.resend_max);
            fiber.wake_at = Some(now + delay);
            if let Some(pkt) = role.command(cmd.code, data) {
                tracing::debug!(role = cmd.role, %pkt, resend = delay, "query");
                self.env.send(&pkt).map_err(|e| Fault::Host(e.to_string()))?;
            }
        }
        Ok(true)
    }

    /// The outermost activation of fiber `idx` returned. Returns `true` if
    /// the fiber restarts because another start was requested meanwhile.
    fn finish(&mut self, idx: usize) -> bool {
        let fiber = &mut self.fibers[idx];
        tracing::debug!(
            function = fiber.first_fun,
            fiber = fiber.id,
            pending = fiber.pending,
            "fiber finished"
        );
        if fiber.pending {
            fiber.pending = false;
            if let Some(frame) = fiber.frames.first_mut() {
                frame.restart();
            }
            true
        } else {
            self.fibers.remove(idx);
            false
        }
    }
}

impl<E: Environment + std::fmt::Debug> std::fmt::Debug for Vm<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("env", &self.env)
            .field("fibers", &self.fibers.len())
            .field("roles", &self.roles)
            .field("panic", &self.panic)
            .finish_non_exhaustive()
    }
}
