//! Lifecycle events and the listener table.
//!
//! Subscriptions are keyed by an opaque [`SubscriptionId`] handed out at
//! subscribe time, never by callback identity. Notification works on a
//! snapshot of the matching callbacks so a callback may subscribe,
//! unsubscribe or mutate the registry while it runs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use super::VariableId;

/// Kinds of lifecycle events.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum EventKind {
    Created,
    Renamed,
    Deleted,
}

/// A lifecycle event delivered to listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Created {
        id: VariableId,
        name: String,
    },
    Renamed {
        id: VariableId,
        old_name: String,
        new_name: String,
    },
    Deleted {
        id: VariableId,
        name: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Created { .. } => EventKind::Created,
            Event::Renamed { .. } => EventKind::Renamed,
            Event::Deleted { .. } => EventKind::Deleted,
        }
    }

    pub fn id(&self) -> VariableId {
        match self {
            Event::Created { id, .. } | Event::Renamed { id, .. } | Event::Deleted { id, .. } => {
                *id
            }
        }
    }

    /// The variable's name after the event.
    pub fn name(&self) -> &str {
        match self {
            Event::Created { name, .. } | Event::Deleted { name, .. } => name,
            Event::Renamed { new_name, .. } => new_name,
        }
    }
}

/// Serializes event-producing mutations together with their delivery, so
/// every listener sees one variable's events in the order they happened.
///
/// Re-entrant: a callback running on the owning thread may create, rename or
/// delete without deadlocking.
#[derive(Default)]
pub(crate) struct DispatchGate {
    owner: Mutex<GateOwner>,
    released: Condvar,
}

#[derive(Default)]
struct GateOwner {
    thread: Option<ThreadId>,
    depth: usize,
}

impl DispatchGate {
    pub(crate) fn enter(&self) -> DispatchGuard<'_> {
        let me = thread::current().id();
        let owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut owner = self
            .released
            .wait_while(owner, |o| o.thread.is_some_and(|t| t != me))
            .unwrap_or_else(PoisonError::into_inner);
        owner.thread = Some(me);
        owner.depth += 1;
        DispatchGuard { gate: self }
    }
}

pub(crate) struct DispatchGuard<'a> {
    gate: &'a DispatchGate,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self.gate.owner.lock().unwrap_or_else(PoisonError::into_inner);
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.gate.released.notify_one();
        }
    }
}

/// Which variables a subscription listens to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Scope {
    /// Every variable.
    Global,
    /// A single variable.
    Variable(VariableId),
}

/// Revocation handle returned by `Registry::subscribe`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    kind: EventKind,
    scope: Scope,
    callback: Listener,
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

impl Listeners {
    pub(crate) fn insert(&mut self, kind: EventKind, scope: Scope, callback: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.insert(
            id,
            Subscription {
                kind,
                scope,
                callback,
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Snapshot the callbacks interested in `kind` for variable `id`.
    /// Scoped listeners come first, then global ones.
    pub(crate) fn matching(&self, kind: EventKind, id: VariableId) -> Vec<Listener> {
        let scoped = self
            .subscriptions
            .values()
            .filter(|s| s.kind == kind && s.scope == Scope::Variable(id));
        let global = self
            .subscriptions
            .values()
            .filter(|s| s.kind == kind && s.scope == Scope::Global);
        scoped.chain(global).map(|s| s.callback.clone()).collect()
    }

    /// Drop every subscription scoped to `id`. Returns how many were dropped.
    pub(crate) fn drop_scoped(&mut self, id: VariableId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, s| s.scope != Scope::Variable(id));
        before - self.subscriptions.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}
