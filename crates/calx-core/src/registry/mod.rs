//! Variable registry (UI-agnostic).
//!
//! The registry is the single source of truth for live variables: their
//! identifiers, names, code, dependency edges and last outputs. It also runs
//! the lifecycle event bus that presentation code subscribes to.
//!
//! # Invariants
//!
//! 1. No two live variables share a name.
//! 2. `a` depends on `b` iff `b` has `a` as a dependent.
//! 3. A variable never depends on itself.
//! 4. Identifiers are never reused; renaming never changes an identifier.
//!
//! All operations take `&self` and are safe to call from several threads.
//! Listener callbacks run after internal locks are released. Create, rename
//! and delete are serialized together with their notifications, so a global
//! listener never sees `Deleted` for a variable before its `Created`.

mod events;
mod ops;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use events::{Event, EventKind, Listener, Scope, SubscriptionId};
pub(crate) use events::{DispatchGate, Listeners};

/// Opaque, monotonically increasing variable identifier.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct VariableId(pub(crate) u64);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capabilities of a variable, fixed when it is created.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum VariableKind {
    /// Reads other variables and produces an output.
    Formula,
    /// Produces an output but never reads other variables.
    Input,
}

impl VariableKind {
    pub fn consumes(self) -> bool {
        matches!(self, VariableKind::Formula)
    }
}

/// A live variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    id: VariableId,
    name: String,
    kind: VariableKind,
    code: String,
    dependencies: BTreeSet<VariableId>,
    dependents: BTreeSet<VariableId>,
    output: Option<String>,
    error: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl Variable {
    fn new(id: VariableId, name: String, kind: VariableKind, code: String) -> Variable {
        Variable {
            id,
            name,
            kind,
            code,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            output: None,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn dependencies(&self) -> &BTreeSet<VariableId> {
        &self.dependencies
    }

    pub fn dependents(&self) -> &BTreeSet<VariableId> {
        &self.dependents
    }

    /// Last computed display string.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Last evaluation error.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Presentation-owned key/value pairs; the kernel never reads them.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

#[derive(Default)]
struct RegistryState {
    variables: HashMap<VariableId, Variable>,
    names: HashMap<String, VariableId>,
    next_id: u64,
}

impl RegistryState {
    /// `"var" + smallest positive integer not currently taken`.
    fn unique_name(&self) -> String {
        let mut count = 1u64;
        loop {
            let name = format!("var{}", count);
            if !self.names.contains_key(&name) {
                return name;
            }
            count += 1;
        }
    }
}

/// Thread-safe variable registry with a lifecycle event bus.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    listeners: Mutex<Listeners>,
    dispatch: DispatchGate,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
