//! Per-variable workers for one kernel run.
//!
//! # State machine
//!
//! ```text
//! Created -> Running -> Succeeded | Failed -> Stopped
//! Created -> Stopped (stop requested before dependencies resolved)
//! ```
//!
//! `Stopped` is terminal. Every slot of a run lives behind one mutex with one
//! condition variable; publishing a result or stopping a worker notifies it,
//! so dependents block without polling and wake on either event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use calx_engine::engine::{Bindings, CancelToken, EvalError, Evaluate, Value};
use tracing::{debug, warn};

use crate::error::WorkerError;

/// Lifecycle of a worker.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum WorkerState {
    Created,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

pub(crate) type WorkerResult = Result<Value, WorkerError>;

/// Message sent from a worker (or a cancel waker) to the collector.
pub(crate) enum Report {
    Done(usize),
    Cancelled,
}

/// A dependency as resolved when the run starts.
#[derive(Clone, Debug)]
pub(crate) enum Dependency {
    Slot { name: String, index: usize },
    Missing { name: String },
}

struct Slot {
    state: WorkerState,
    result: Option<WorkerResult>,
    /// Another worker of the run took this slot's name.
    superseded: bool,
}

struct WorkerInfo {
    name: RwLock<String>,
    cancel: CancelToken,
}

/// Shared state of one kernel run.
pub(crate) struct Run {
    workers: Vec<WorkerInfo>,
    slots: Mutex<Vec<Slot>>,
    changed: Condvar,
}

impl Run {
    pub(crate) fn new<I: IntoIterator<Item = String>>(names: I) -> Run {
        let workers: Vec<WorkerInfo> = names
            .into_iter()
            .map(|name| WorkerInfo {
                name: RwLock::new(name),
                cancel: CancelToken::new(),
            })
            .collect();
        let slots = workers
            .iter()
            .map(|_| Slot {
                state: WorkerState::Created,
                result: None,
                superseded: false,
            })
            .collect();
        Run {
            workers,
            slots: Mutex::new(slots),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name(&self, index: usize) -> String {
        self.workers[index]
            .name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_name(&self, index: usize, name: &str) {
        *self.workers[index]
            .name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    /// Give worker `index` the name `name`.
    ///
    /// Any finished slot of this run already holding `name` is superseded so
    /// its stale result never shadows the renamed worker's. Fails, changing
    /// nothing, while such a slot has not reached `Stopped`.
    pub(crate) fn claim_name(&self, index: usize, name: &str) -> bool {
        let mut slots = self.slots();
        let holders: Vec<usize> = (0..self.len())
            .filter(|&other| other != index && !slots[other].superseded && self.name(other) == name)
            .collect();
        if holders
            .iter()
            .any(|&other| slots[other].state != WorkerState::Stopped)
        {
            return false;
        }
        for other in holders {
            slots[other].superseded = true;
        }
        self.set_name(index, name);
        true
    }

    pub(crate) fn is_superseded(&self, index: usize) -> bool {
        self.slots()[index].superseded
    }

    pub(crate) fn state(&self, index: usize) -> WorkerState {
        self.slots()[index].state
    }

    pub(crate) fn result(&self, index: usize) -> Option<WorkerResult> {
        self.slots()[index].result.clone()
    }

    /// Settle a slot that never gets a thread (e.g. a variable on a cycle).
    pub(crate) fn settle(&self, index: usize, result: WorkerResult) {
        let mut slots = self.slots();
        slots[index].result = Some(result);
        slots[index].state = WorkerState::Stopped;
        self.changed.notify_all();
    }

    /// Ask a worker to stop. Idempotent.
    ///
    /// An unfinished worker's slot is failed with [`WorkerError::Stopped`]
    /// right away so dependents waiting on it wake up.
    pub(crate) fn stop(&self, index: usize) {
        self.stop_with(index, |name| WorkerError::Stopped { name });
    }

    pub(crate) fn stop_with(&self, index: usize, error: impl FnOnce(String) -> WorkerError) {
        self.workers[index].cancel.cancel();
        let name = self.name(index);
        let mut slots = self.slots();
        let slot = &mut slots[index];
        if slot.result.is_none() {
            debug!(worker = %name, "stopping worker");
            slot.result = Some(Err(error(name)));
            slot.state = WorkerState::Failed;
        }
        self.changed.notify_all();
    }

    pub(crate) fn stop_all(&self) {
        for index in 0..self.len() {
            self.stop(index);
        }
    }

    /// Block until worker `index` reaches `Stopped` or `timeout` elapses.
    pub(crate) fn wait_stopped(&self, index: usize, timeout: Duration) -> bool {
        let slots = self.slots();
        let (_slots, wait) = self
            .changed
            .wait_timeout_while(slots, timeout, |slots| {
                slots[index].state != WorkerState::Stopped
            })
            .unwrap_or_else(PoisonError::into_inner);
        !wait.timed_out()
    }

    /// Block until `dependency` has a result or `waiter` is stopped.
    /// Returns `None` if the waiter was stopped first.
    fn wait_for(&self, waiter: usize, dependency: usize) -> Option<WorkerResult> {
        let cancel = &self.workers[waiter].cancel;
        let slots = self.slots();
        let slots = self
            .changed
            .wait_while(slots, |slots| {
                slots[dependency].result.is_none() && !cancel.is_cancelled()
            })
            .unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return None;
        }
        slots[dependency].result.clone()
    }

    /// `Created -> Running`, unless a stop got there first.
    fn begin(&self, index: usize) -> bool {
        let mut slots = self.slots();
        let slot = &mut slots[index];
        if slot.result.is_some() || self.workers[index].cancel.is_cancelled() {
            return false;
        }
        slot.state = WorkerState::Running;
        true
    }

    /// Publish a result unless the slot was already settled by a stop.
    fn finish(&self, index: usize, result: WorkerResult) {
        let mut slots = self.slots();
        let slot = &mut slots[index];
        if slot.result.is_none() {
            slot.state = if result.is_ok() {
                WorkerState::Succeeded
            } else {
                WorkerState::Failed
            };
            slot.result = Some(result);
        }
        self.changed.notify_all();
    }

    fn mark_stopped(&self, index: usize) {
        let mut slots = self.slots();
        slots[index].state = WorkerState::Stopped;
        self.changed.notify_all();
    }
}

/// Everything a worker thread needs.
pub(crate) struct WorkerTask {
    pub(crate) run: Arc<Run>,
    pub(crate) index: usize,
    pub(crate) code: String,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) evaluator: Arc<dyn Evaluate>,
    pub(crate) report: Sender<Report>,
}

impl WorkerTask {
    /// Thread body: resolve dependencies, evaluate, publish, stop, report.
    pub(crate) fn run(self) {
        let result = self.compute();
        if let Err(err) = &result {
            debug!(worker = %self.run.name(self.index), error = %err, "worker failed");
        }
        self.run.finish(self.index, result);
        self.run.mark_stopped(self.index);
        // The collector may already have given up on this run.
        let _ = self.report.send(Report::Done(self.index));
    }

    fn compute(&self) -> WorkerResult {
        let run = &self.run;
        let index = self.index;
        let mut bindings = Bindings::new();

        for dependency in &self.dependencies {
            match dependency {
                Dependency::Missing { name } => {
                    return Err(WorkerError::MissingDependency {
                        name: run.name(index),
                        dependency: name.clone(),
                    });
                }
                Dependency::Slot { name, index: dep } => match run.wait_for(index, *dep) {
                    Some(Ok(value)) => {
                        bindings.insert(name.clone(), value);
                    }
                    Some(Err(_)) => {
                        return Err(WorkerError::DependencyFailed {
                            name: run.name(index),
                            dependency: name.clone(),
                        });
                    }
                    None => return Err(WorkerError::Stopped { name: run.name(index) }),
                },
            }
        }

        if !run.begin(index) {
            return Err(WorkerError::Stopped { name: run.name(index) });
        }
        debug!(worker = %run.name(index), "worker running");

        let cancel = &run.workers[index].cancel;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.evaluate(&self.code, &bindings, cancel)
        }));
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(EvalError::Terminated)) if cancel.is_cancelled() => {
                Err(WorkerError::Stopped { name: run.name(index) })
            }
            Ok(Err(err)) => Err(WorkerError::Evaluation {
                name: run.name(index),
                message: err.to_string(),
            }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(worker = %run.name(index), %message, "recovered from evaluator panic");
                Err(WorkerError::Evaluation {
                    name: run.name(index),
                    message: EvalError::Panicked(message).to_string(),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a worker in the kernel's active table.
#[derive(Clone)]
pub(crate) struct WorkerHandle {
    pub(crate) run: Arc<Run>,
    pub(crate) index: usize,
}

impl WorkerHandle {
    pub(crate) fn name(&self) -> String {
        self.run.name(self.index)
    }

    pub(crate) fn rename(&self, name: &str) -> bool {
        self.run.claim_name(self.index, name)
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.run.state(self.index)
    }

    pub(crate) fn stop(&self) {
        self.run.stop(self.index);
    }

    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        self.run.wait_stopped(self.index, timeout)
    }

    pub(crate) fn belongs_to(&self, run: &Arc<Run>) -> bool {
        Arc::ptr_eq(&self.run, run)
    }
}
