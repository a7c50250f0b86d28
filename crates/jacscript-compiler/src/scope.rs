//! Named cells: variables, roles and functions.
//!
//! Name resolution walks the current procedure's locals, then the globals,
//! then the roles, then the functions. Declaring a name that any of these
//! already holds is an error.

use jacscript_registry::{PacketSpec, ServiceSpec};
use rustc_hash::FxHashMap;

// ============================================================================
// Variables
// ============================================================================

/// An ordered set of variable names, indexed by declaration order.
#[derive(Debug, Default)]
pub struct VariableScope {
    index: FxHashMap<String, u32>,
    names: Vec<String>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name`, returning its index. The caller checks for clashes.
    pub fn add(&mut self, name: &str) -> u32 {
        let idx = self.add_hidden(name);
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Add a compiler temporary that cannot be referenced by name.
    pub fn add_hidden(&mut self, name: &str) -> u32 {
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Display names, in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// ============================================================================
// Roles
// ============================================================================

/// A declared role and everything the script subscribed to on it.
#[derive(Debug)]
pub struct RoleCell<'c> {
    pub name: String,
    pub spec: &'c ServiceSpec,
    pub dispatcher: Option<Dispatcher<'c>>,
    /// Registers kept fresh by the auto-refresh loop.
    pub refreshed: Vec<&'c PacketSpec>,
}

impl<'c> RoleCell<'c> {
    pub fn new(name: impl Into<String>, spec: &'c ServiceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            dispatcher: None,
            refreshed: Vec::new(),
        }
    }

    /// Add `packet` to the auto-refresh set once.
    pub fn refresh(&mut self, packet: &'c PacketSpec) {
        if !self.refreshed.iter().any(|p| p.identifier == packet.identifier) {
            self.refreshed.push(packet);
        }
    }
}

/// Subscriptions served by one role's dispatcher procedure.
#[derive(Debug)]
pub struct Dispatcher<'c> {
    pub proc: usize,
    /// `(event or command code, handler)`
    pub events: Vec<(u16, usize)>,
    pub on_change: Vec<OnChange<'c>>,
    pub connected: Vec<usize>,
    pub disconnected: Vec<usize>,
}

impl Dispatcher<'_> {
    pub fn new(proc: usize) -> Self {
        Self {
            proc,
            events: Vec::new(),
            on_change: Vec::new(),
            connected: Vec::new(),
            disconnected: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct OnChange<'c> {
    pub packet: &'c PacketSpec,
    pub threshold: f64,
    pub handler: usize,
}

// ============================================================================
// Functions
// ============================================================================

/// A top-level `function` declaration.
#[derive(Debug)]
pub struct FunctionCell {
    pub name: String,
    pub proc: usize,
    pub num_params: usize,
    /// Set once the body has been lowered.
    pub emitted: bool,
}
