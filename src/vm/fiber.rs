//! Fibers and their activation records.

use jacscript_core::{FunctionInfo, NUM_REGS};

/// One call frame.
#[derive(Debug, Clone)]
pub(crate) struct Activation {
    pub function: usize,
    start_pc: usize,
    pub pc: usize,
    /// The function's locals followed by its register save area.
    pub locals: Vec<f64>,
    num_locals: usize,
    /// Registers parked in the save area, restored on the next activation.
    saved: u16,
}

impl Activation {
    /// A frame for `function` whose first locals are `args`.
    pub fn new(function: usize, info: &FunctionInfo, args: &[f64]) -> Self {
        let mut locals = vec![0.0; info.frame_size()];
        let n = args.len().min(locals.len());
        locals[..n].copy_from_slice(&args[..n]);
        Activation {
            function,
            start_pc: info.start_pc(),
            pc: info.start_pc(),
            locals,
            num_locals: info.num_locals as usize,
            saved: 0,
        }
    }

    pub fn restart(&mut self) {
        self.pc = self.start_pc;
    }

    /// Park the registers in `mask`. Fails if the save area is too small.
    pub fn save_regs(&mut self, mask: u16, regs: &[f64; NUM_REGS]) -> Result<(), String> {
        let mut slot = self.num_locals;
        for (i, &r) in regs.iter().enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            let dst = self
                .locals
                .get_mut(slot)
                .ok_or_else(|| format!("register save area of function {} overflows", self.function))?;
            *dst = r;
            slot += 1;
        }
        self.saved = mask;
        Ok(())
    }

    pub fn restore_regs(&mut self, regs: &mut [f64; NUM_REGS]) {
        let mut slot = self.num_locals;
        for (i, r) in regs.iter_mut().enumerate() {
            if self.saved & (1 << i) != 0 {
                *r = self.locals[slot];
                slot += 1;
            }
        }
        self.saved = 0;
    }
}

/// A request a fiber is waiting on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingCommand {
    pub role: usize,
    pub code: u16,
    /// Payload still to be sent; `None` for register queries, which are
    /// resent until answered.
    pub payload: Option<Vec<u8>>,
    pub argument: Option<Vec<u8>>,
    pub resend: u64,
}

/// A cooperative thread of script execution.
#[derive(Debug)]
pub(crate) struct Fiber {
    pub id: u32,
    /// Function the fiber was started with.
    pub first_fun: usize,
    /// Call stack, innermost last.
    pub frames: Vec<Activation>,
    /// When to resume; `None` while waiting on the bus only.
    pub wake_at: Option<u64>,
    pub waiting_on_role: Option<usize>,
    pub command: Option<PendingCommand>,
    /// Restart once the current run finishes.
    pub pending: bool,
}

impl Fiber {
    pub fn new(id: u32, first_fun: usize, frame: Activation, now: u64) -> Self {
        Fiber {
            id,
            first_fun,
            frames: vec![frame],
            wake_at: Some(now),
            waiting_on_role: None,
            command: None,
            pending: false,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.wake_at.is_some_and(|t| t <= now)
    }

    pub fn frame(&mut self) -> Option<&mut Activation> {
        self.frames.last_mut()
    }
}
