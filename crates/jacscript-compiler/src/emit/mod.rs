//! Instruction writer for a single procedure.
//!
//! [`OpWriter`] owns one procedure's code buffer, its labels, its source map
//! and the register file used while lowering expressions. It knows the
//! instruction encoding but nothing about values or scopes; the lowering code
//! in [`crate::expr`] and [`crate::stmt`] drives it.
//!
//! ## Registers
//!
//! Registers are handed out from a stack of scopes. [`OpWriter::push`] opens a
//! scope, every allocation lands in the innermost scope, and
//! [`OpWriter::pop`] releases everything allocated since the matching push.
//! [`OpWriter::pop_except`] keeps one register alive by moving it to the
//! parent scope, which is how an expression hands its result to its caller.

mod jumps;

pub use jumps::Label;

use jacscript_core::format::{BUFFER_REG, NUM_REGS};
use jacscript_core::{
    CellKind, CompilationError, Instr, OpAsync, OpBinary, OpCall, OpSync, OpTop, OpUnary, RegMask,
    Span, SrcMapEntry,
};

use jumps::LabelInfo;

type Result<T> = std::result::Result<T, CompilationError>;

/// Largest value a prefix plus `SET_HIGH` can carry.
const MAX_OPERAND: u32 = (1 << 22) - 1;

/// Code buffer and register state of one procedure.
#[derive(Debug)]
pub struct OpWriter {
    code: Vec<u16>,
    labels: Vec<LabelInfo>,
    allocated: RegMask,
    scopes: Vec<Vec<u8>>,
    max_regs: u8,
    srcmap: Vec<SrcMapEntry>,
    /// Line and first instruction of the statement being emitted.
    stmt: Option<(u32, usize)>,
    /// Start of the procedure.
    pub top: Label,
    /// Target of `return` statements.
    pub ret: Label,
}

impl Default for OpWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpWriter {
    pub fn new() -> Self {
        let mut w = Self {
            code: Vec::new(),
            labels: Vec::new(),
            allocated: RegMask::empty(),
            scopes: Vec::new(),
            max_regs: 0,
            srcmap: Vec::new(),
            stmt: None,
            top: Label::default(),
            ret: Label::default(),
        };
        w.top = w.mk_label("top");
        w.ret = w.mk_label("ret");
        w.emit_label(w.top);
        w
    }

    /// Instructions emitted so far.
    pub fn code(&self) -> &[u16] {
        &self.code
    }

    /// Offset of the next instruction.
    #[inline]
    pub fn location(&self) -> usize {
        self.code.len()
    }

    /// Most registers saved by any call or async op in this procedure.
    pub fn max_regs(&self) -> u8 {
        self.max_regs
    }

    pub fn srcmap(&self) -> &[SrcMapEntry] {
        &self.srcmap
    }

    // ========================================================================
    // Register allocation
    // ========================================================================

    pub fn push(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn pop(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            panic!("register scope popped without a matching push");
        };
        for r in scope {
            self.free(r);
        }
    }

    /// Pop the innermost scope but keep `keep` allocated in the parent.
    pub fn pop_except(&mut self, keep: Option<u8>) {
        let Some(scope) = self.scopes.pop() else {
            panic!("register scope popped without a matching push");
        };
        let mut kept = false;
        for r in scope {
            if Some(r) == keep {
                kept = true;
            } else {
                self.free(r);
            }
        }
        if let (true, Some(r)) = (kept, keep) {
            match self.scopes.last_mut() {
                Some(parent) => parent.push(r),
                None => panic!("pop_except() on the outermost register scope"),
            }
        }
    }

    /// Depth of the scope stack.
    #[inline]
    pub fn num_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// Whether register `r` is currently allocated.
    #[inline]
    pub fn is_live(&self, r: u8) -> bool {
        self.allocated.has(r)
    }

    fn free(&mut self, r: u8) {
        assert!(self.allocated.has(r), "register {r} freed twice");
        self.allocated.remove(RegMask::reg(r));
    }

    fn do_alloc(&mut self, r: u8) -> Result<()> {
        if self.allocated.has(r) {
            return Err(if r == BUFFER_REG {
                CompilationError::BufferInUse {
                    span: Span::default(),
                }
            } else {
                CompilationError::ExpressionTooComplex {
                    span: Span::default(),
                }
            });
        }
        let Some(scope) = self.scopes.last_mut() else {
            panic!("register allocated outside of any scope");
        };
        scope.push(r);
        self.allocated.insert(RegMask::reg(r));
        Ok(())
    }

    /// Allocate the highest free general purpose register.
    pub fn alloc_reg(&mut self) -> Result<u8> {
        let free = (0..NUM_REGS as u8)
            .rev()
            .find(|&r| !self.allocated.has(r))
            .ok_or(CompilationError::ExpressionTooComplex {
                span: Span::default(),
            })?;
        self.do_alloc(free)?;
        Ok(free)
    }

    /// Reserve the packet buffer.
    pub fn alloc_buf(&mut self) -> Result<()> {
        self.do_alloc(BUFFER_REG)
    }

    /// Allocate exactly `R0..Rn`, failing if any of them is live.
    pub fn alloc_args(&mut self, n: usize) -> Result<Vec<u8>> {
        (0..n as u8).map(|r| self.do_alloc(r).map(|_| r)).collect()
    }

    /// Registers that must survive a suspension right now.
    fn save_regs(&mut self) -> u32 {
        let d = self.allocated.general();
        self.max_regs = self.max_regs.max(d.count_ones() as u8);
        d as u32
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    pub fn emit_raw(&mut self, op: OpTop, arg: u16) {
        self.code.push(Instr::new(op, arg).0);
    }

    /// Emit the prefix words needed to carry `a`..`d`.
    ///
    /// The low twelve bits go first since `SET_x` overwrites its operand
    /// while `SET_HIGH` ors into it.
    fn emit_prefix(&mut self, a: u32, b: u32, c: u32, d: u32) {
        for (slot, v) in [a, b, c, d].into_iter().enumerate() {
            if v == 0 {
                continue;
            }
            assert!(v <= MAX_OPERAND, "operand {v:#x} does not fit a prefix");
            let set = match slot {
                0 => OpTop::SetA,
                1 => OpTop::SetB,
                2 => OpTop::SetC,
                _ => OpTop::SetD,
            };
            self.emit_raw(set, (v & 0xfff) as u16);
            if v >> 12 != 0 {
                self.emit_raw(OpTop::SetHigh, ((slot as u16) << 10) | (v >> 12) as u16);
            }
        }
    }

    pub fn emit_sync(&mut self, op: OpSync, a: u32, b: u32, c: u32, d: u32) {
        self.emit_prefix(a >> 4, b, c, d);
        self.emit_raw(OpTop::Sync, (((a & 0xf) as u16) << 8) | op as u16);
    }

    /// Emit a suspending op; every live register is saved across it.
    pub fn emit_async(&mut self, op: OpAsync, a: u32, b: u32, c: u32) {
        let d = self.save_regs();
        self.emit_prefix(a, b, c, d >> 4);
        self.emit_raw(OpTop::Async, (((d & 0xf) as u16) << 8) | op as u16);
    }

    pub fn emit_mov(&mut self, dst: u8, src: u8) {
        self.emit_unary(OpUnary::Id, dst, src);
    }

    pub fn emit_unary(&mut self, op: OpUnary, dst: u8, src: u8) {
        self.emit_raw(
            OpTop::Unary,
            ((op as u16) << 8) | ((dst as u16) << 4) | src as u16,
        );
    }

    /// `dst = dst op src`
    pub fn emit_bin(&mut self, op: OpBinary, dst: u8, src: u8) {
        self.emit_raw(
            OpTop::Binary,
            ((op as u16) << 8) | ((dst as u16) << 4) | src as u16,
        );
    }

    fn emit_cell(&mut self, op: OpTop, reg: u8, kind: CellKind, idx: u32, c: u32) {
        let kind = kind as u32;
        self.emit_prefix(kind >> 2, idx >> 6, c, 0);
        self.emit_raw(
            op,
            ((reg as u16) << 8) | (((kind & 0x3) as u16) << 6) | (idx & 0x3f) as u16,
        );
    }

    pub fn emit_load_cell(&mut self, dst: u8, kind: CellKind, idx: u32, c: u32) {
        self.emit_cell(OpTop::LoadCell, dst, kind, idx, c);
    }

    pub fn emit_store_cell(&mut self, src: u8, kind: CellKind, idx: u32, c: u32) {
        self.emit_cell(OpTop::StoreCell, src, kind, idx, c);
    }

    /// Call function `index`. Synchronous calls save the live registers;
    /// background calls start from a clean register file.
    pub fn emit_call(&mut self, index: usize, numargs: usize, op: OpCall) {
        assert!(numargs < 16, "{numargs} call arguments");
        let d = if op == OpCall::Sync { self.save_regs() } else { 0 };
        let index = index as u32;
        self.emit_prefix(0, index >> 6, 0, d);
        self.emit_raw(
            OpTop::Call,
            ((numargs as u16) << 8) | ((op as u16) << 6) | (index & 0x3f) as u16,
        );
    }

    // ========================================================================
    // Source map
    // ========================================================================

    /// Attribute instructions from here on to `line`.
    pub fn stmt_start(&mut self, line: u32) {
        self.fin_stmt();
        self.stmt = Some((line, self.code.len()));
    }

    /// Close the current statement and resume attributing to `outer`, the
    /// enclosing statement's line if any.
    pub fn stmt_end(&mut self, outer: Option<u32>) {
        self.fin_stmt();
        self.stmt = outer.map(|line| (line, self.code.len()));
    }

    /// Line of the statement currently being emitted.
    pub fn current_line(&self) -> Option<u32> {
        self.stmt.map(|(line, _)| line)
    }

    fn fin_stmt(&mut self) {
        if let Some((line, start)) = self.stmt.take() {
            let len = self.code.len() - start;
            if len > 0 {
                self.srcmap.push(SrcMapEntry {
                    line,
                    start: start as u32,
                    len: len as u32,
                });
            }
        }
    }

    /// Close the source map, patch jumps and pad the body to a whole number
    /// of 32-bit words.
    ///
    /// With `strict` set, a label that has uses but was never emitted is an
    /// internal defect. Without it (the script had errors) such jumps are
    /// left unpatched.
    pub fn finalize(&mut self, strict: bool) {
        self.fin_stmt();
        self.patch_labels(strict);
        if self.code.len() % 2 == 1 {
            self.emit_sync(OpSync::Return, 0, 0, 0, 0);
        }
    }
}
