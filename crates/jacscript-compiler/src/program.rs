//! The compilation context threaded through every lowering function.
//!
//! [`Program`] owns all procedures, the role, global and function tables,
//! the literal pools and the accumulated errors. Lowering code reaches the
//! current procedure's writer through [`Program::wr`].

use jacscript_ast::Expr;
use jacscript_core::{CellKind, CompilationError, OpCall, Span, ValueSpecial};
use jacscript_registry::{FieldSpec, ServiceCatalog};
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::CompileOptions;
use crate::emit::OpWriter;
use crate::procedure::Procedure;
use crate::scope::{Dispatcher, FunctionCell, RoleCell, VariableScope};
use crate::value::Value;

pub(crate) type Result<T> = std::result::Result<T, CompilationError>;

/// Index of the main procedure.
pub(crate) const MAIN: usize = 0;

/// Builtins that cannot be redefined as functions.
pub(crate) const RESERVED: &[&str] = &[
    "wait", "every", "upload", "print", "format", "panic", "reboot", "isNaN",
];

pub(crate) struct Program<'c> {
    pub(crate) catalog: &'c ServiceCatalog,
    pub(crate) options: CompileOptions,
    pub(crate) procs: Vec<Procedure>,
    /// Procedure currently being emitted into.
    pub(crate) proc: usize,
    pub(crate) roles: Vec<RoleCell<'c>>,
    pub(crate) role_index: FxHashMap<String, usize>,
    pub(crate) globals: VariableScope,
    pub(crate) functions: Vec<FunctionCell>,
    pub(crate) function_index: FxHashMap<String, usize>,
    pub(crate) floats: Vec<f64>,
    float_index: FxHashMap<OrderedFloat<f64>, u32>,
    pub(crate) strings: Vec<String>,
    string_index: FxHashMap<String, u32>,
    pub(crate) errors: Vec<CompilationError>,
    pub(crate) num_errors: usize,
    /// Whether the statement being lowered is a top-level statement of main.
    pub(crate) top_level: bool,
}

impl<'c> Program<'c> {
    pub(crate) fn new(catalog: &'c ServiceCatalog, options: CompileOptions) -> Self {
        Self {
            catalog,
            options,
            procs: vec![Procedure::new("main", 0)],
            proc: MAIN,
            roles: Vec::new(),
            role_index: FxHashMap::default(),
            globals: VariableScope::new(),
            functions: Vec::new(),
            function_index: FxHashMap::default(),
            floats: Vec::new(),
            float_index: FxHashMap::default(),
            strings: Vec::new(),
            string_index: FxHashMap::default(),
            errors: Vec::new(),
            num_errors: 0,
            top_level: false,
        }
    }

    /// Writer of the current procedure.
    #[inline]
    pub(crate) fn wr(&mut self) -> &mut OpWriter {
        &mut self.procs[self.proc].writer
    }

    #[inline]
    pub(crate) fn cur(&mut self) -> &mut Procedure {
        &mut self.procs[self.proc]
    }

    pub(crate) fn add_procedure(&mut self, name: impl Into<String>, num_params: usize) -> usize {
        self.procs.push(Procedure::new(name, num_params));
        self.procs.len() - 1
    }

    // ========================================================================
    // Errors
    // ========================================================================

    pub(crate) fn report(&mut self, err: CompilationError) {
        tracing::debug!(%err, "compile error");
        self.num_errors += 1;
        let max = self.options.max_errors;
        if max == 0 || self.errors.len() < max {
            self.errors.push(err);
        }
    }

    /// Run `f` inside a fresh register scope. An error is reported at
    /// `span` (unless it carries its own position) and the scopes `f` left
    /// open are unwound.
    pub(crate) fn guarded(&mut self, span: Span, f: impl FnOnce(&mut Self) -> Result<()>) {
        let depth = self.wr().num_scopes();
        self.wr().push();
        match f(self) {
            Ok(()) => {
                self.wr().pop();
                let open = self.wr().num_scopes();
                assert!(
                    open == depth,
                    "register scope imbalance: {open} open, expected {depth}"
                );
            }
            Err(err) => {
                self.report(err.or_span(span));
                while self.wr().num_scopes() > depth {
                    self.wr().pop();
                }
            }
        }
    }

    /// Emit into procedure `proc` for the duration of `f`.
    pub(crate) fn with_procedure<T>(
        &mut self,
        proc: usize,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let prev = std::mem::replace(&mut self.proc, proc);
        let depth = self.wr().num_scopes();
        self.wr().push();
        let res = f(self);
        if res.is_ok() {
            self.wr().pop();
            assert!(
                self.wr().num_scopes() == depth,
                "register scope imbalance in {}",
                self.procs[proc].name
            );
        } else {
            while self.wr().num_scopes() > depth {
                self.wr().pop();
            }
        }
        self.proc = prev;
        res
    }

    pub(crate) fn require_top_level(&self, construct: &str) -> Result<()> {
        if self.top_level && self.proc == MAIN {
            Ok(())
        } else {
            Err(CompilationError::TopLevelOnly {
                construct: construct.to_string(),
                span: Span::default(),
            })
        }
    }

    // ========================================================================
    // Names
    // ========================================================================

    /// Resolve `name` against locals, globals, roles and functions.
    pub(crate) fn resolve(&self, name: &str) -> Option<Value<'c>> {
        if let Some(index) = self.procs[self.proc].locals.lookup(name) {
            return Some(Value::Cell {
                kind: CellKind::Local,
                index,
            });
        }
        if let Some(index) = self.globals.lookup(name) {
            return Some(Value::Cell {
                kind: CellKind::Global,
                index,
            });
        }
        if let Some(&role) = self.role_index.get(name) {
            return Some(Value::Role(role));
        }
        self.function_index.get(name).map(|&f| Value::Function(f))
    }

    /// Fail if declaring `name` would shadow anything visible.
    pub(crate) fn check_free(&self, name: &str, span: Span) -> Result<()> {
        if self.resolve(name).is_some() {
            return Err(CompilationError::AlreadyDefined {
                name: name.to_string(),
                span,
            });
        }
        Ok(())
    }

    /// Resolve an assignment target.
    pub(crate) fn lookup_var(&self, name: &str, span: Span) -> Result<Value<'c>> {
        match self.resolve(name) {
            Some(v) if v.is_variable() => Ok(v),
            Some(_) => Err(CompilationError::ExpectedVariable { span }),
            None => Err(CompilationError::UnknownName {
                name: name.to_string(),
                span,
            }),
        }
    }

    // ========================================================================
    // Literal pools
    // ========================================================================

    pub(crate) fn float_literal(&mut self, v: f64) -> u32 {
        if let Some(&idx) = self.float_index.get(&OrderedFloat(v)) {
            return idx;
        }
        let idx = self.floats.len() as u32;
        self.floats.push(v);
        self.float_index.insert(OrderedFloat(v), idx);
        idx
    }

    pub(crate) fn string_literal(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.string_index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), idx);
        idx
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Load a constant, using the cheapest cell that represents it exactly.
    pub(crate) fn load_float(&mut self, dst: u8, v: f64) {
        if v.is_nan() {
            self.wr()
                .emit_load_cell(dst, CellKind::Special, ValueSpecial::Nan as u32, 0);
        } else if v.fract() == 0.0 && (0.0..=65535.0).contains(&v) {
            self.wr()
                .emit_load_cell(dst, CellKind::Identity, v as u32, 0);
        } else {
            let idx = self.float_literal(v);
            self.wr().emit_load_cell(dst, CellKind::FloatConst, idx, 0);
        }
    }

    pub(crate) fn assign(&mut self, dst: Value<'c>, src: Value<'c>) -> Result<()> {
        if !src.is_number() {
            return Err(CompilationError::ValueRequired {
                span: Span::default(),
            });
        }
        match dst {
            Value::Reg(d) => {
                match src {
                    Value::Reg(s) if s != d => self.wr().emit_mov(d, s),
                    Value::Reg(_) => {}
                    Value::Float(v) => self.load_float(d, v),
                    Value::Cell { kind, index } => self.wr().emit_load_cell(d, kind, index, 0),
                    _ => {
                        return Err(CompilationError::ValueRequired {
                            span: Span::default(),
                        });
                    }
                }
                Ok(())
            }
            Value::Cell { kind, index } if dst.is_variable() => {
                if let Value::Reg(s) = src {
                    self.wr().emit_store_cell(s, kind, index, 0);
                } else {
                    self.wr().push();
                    let r = self.force_reg(src)?;
                    self.wr().emit_store_cell(r, kind, index, 0);
                    self.wr().pop();
                }
                Ok(())
            }
            _ => Err(CompilationError::ExpectedVariable {
                span: Span::default(),
            }),
        }
    }

    /// Make sure `v` is in a register, allocating one if needed.
    pub(crate) fn force_reg(&mut self, v: Value<'c>) -> Result<u8> {
        if let Value::Reg(r) = v {
            return Ok(r);
        }
        if !v.is_number() {
            return Err(CompilationError::ValueRequired {
                span: Span::default(),
            });
        }
        let r = self.wr().alloc_reg()?;
        self.assign(Value::Reg(r), v)?;
        Ok(r)
    }

    /// Lower `expr` into a register.
    pub(crate) fn emit_simple_value(&mut self, expr: &Expr<'_>) -> Result<u8> {
        let v = self.emit_expr(expr)?;
        self.force_reg(v).map_err(|e| e.or_span(expr.span()))
    }

    /// Evaluate `args` and move them into `R0..Rn`.
    ///
    /// Everything is evaluated before the argument registers are claimed so
    /// that nested calls are free to use them.
    pub(crate) fn emit_args(&mut self, args: &[Expr<'_>]) -> Result<()> {
        let mut vals = Vec::with_capacity(args.len());
        for arg in args {
            let v = self.emit_expr(arg)?;
            if !v.is_number() {
                return Err(CompilationError::ValueRequired { span: arg.span() });
            }
            vals.push(v);
        }
        let regs = self.wr().alloc_args(vals.len())?;
        for (r, v) in regs.into_iter().zip(vals) {
            self.assign(Value::Reg(r), v)?;
        }
        Ok(())
    }

    // ========================================================================
    // Packet buffer fields
    // ========================================================================

    fn buffer_cell(field: &FieldSpec) -> Result<u32> {
        let fmt = field.fmt().ok_or_else(|| {
            CompilationError::unsupported(
                Span::default(),
                format!("field '{}' has an unsupported width", field.name),
            )
        })?;
        assert!(
            field.shift as u32 <= fmt.bit_size(),
            "field '{}' shifted past its width",
            field.name
        );
        Ok(((field.shift as u32) << 4) | fmt as u32)
    }

    pub(crate) fn emit_buf_load(&mut self, dst: u8, field: &FieldSpec, offset: usize) -> Result<()> {
        let idx = Self::buffer_cell(field)?;
        self.wr()
            .emit_load_cell(dst, CellKind::Buffer, idx, offset as u32);
        Ok(())
    }

    pub(crate) fn emit_buf_store(&mut self, src: u8, field: &FieldSpec, offset: usize) -> Result<()> {
        let idx = Self::buffer_cell(field)?;
        self.wr()
            .emit_store_cell(src, CellKind::Buffer, idx, offset as u32);
        Ok(())
    }

    // ========================================================================
    // Dispatchers
    // ========================================================================

    /// The dispatcher of `role`, created on first use.
    pub(crate) fn dispatcher(&mut self, role: usize) -> &mut Dispatcher<'c> {
        let proc = match &self.roles[role].dispatcher {
            Some(d) => d.proc,
            None => {
                let name = format!("{}_disp", self.roles[role].name);
                self.add_procedure(name, 0)
            }
        };
        self.roles[role]
            .dispatcher
            .get_or_insert_with(|| Dispatcher::new(proc))
    }

    /// Start `role`'s dispatcher from the current location. `BG_MAX1`
    /// makes repeated starts harmless.
    pub(crate) fn start_dispatcher(&mut self, role: usize) {
        let proc = self.dispatcher(role).proc;
        self.wr().emit_call(proc, 0, OpCall::BgMax1);
    }
}
