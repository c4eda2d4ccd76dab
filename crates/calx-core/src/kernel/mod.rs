//! Concurrent evaluation kernel.
//!
//! [`Kernel::update`] takes a [`Selection`] (name -> code + dependency names),
//! spawns one worker thread per variable and blocks until every worker has
//! reported, the run times out, or it is cancelled.
//!
//! - Variables on a dependency cycle fail with `CyclicDependency` and get no
//!   worker at all.
//! - A worker waits for each dependency's result before it starts running.
//! - A failure only affects that variable's slot and, through
//!   `DependencyFailed`, the variables that read it.
//! - Only failing to spawn a thread aborts the whole update.

mod cycle;
mod outputs;
mod worker;

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use calx_engine::engine::{CancelToken, Evaluate, format_value};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::KernelConfig;
use crate::error::{KernelError, WorkerError};
use crate::registry::{Event, EventKind, Registry, Scope, SubscriptionId};

pub use cycle::{detect_cycle, find_cycles};
pub use outputs::{ERROR_MARKER, Outputs};
pub use worker::WorkerState;

use worker::{Dependency, Report, Run, WorkerHandle, WorkerTask};

/// Code and dependency names of one variable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Formula {
    pub code: String,
    pub dependencies: Vec<String>,
}

impl Formula {
    pub fn new(code: &str, dependencies: Vec<String>) -> Formula {
        Formula {
            code: code.to_string(),
            dependencies,
        }
    }
}

/// Input of one kernel run, keyed by variable name.
pub type Selection = BTreeMap<String, Formula>;

/// Schedules and runs formula workers.
pub struct Kernel {
    evaluator: Arc<dyn Evaluate>,
    config: KernelConfig,
    /// Workers that may still be alive, keyed by their current name.
    active: DashMap<String, WorkerHandle>,
}

impl Kernel {
    pub fn new(evaluator: Arc<dyn Evaluate>) -> Self {
        Self::with_config(evaluator, KernelConfig::default())
    }

    pub fn with_config(evaluator: Arc<dyn Evaluate>, config: KernelConfig) -> Self {
        Kernel {
            evaluator,
            config,
            active: DashMap::new(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Evaluate every variable in `selection`.
    pub fn update(&self, selection: &Selection) -> Result<Outputs, KernelError> {
        self.update_with_cancel(selection, &CancelToken::new())
    }

    /// Evaluate `selection`, abandoning the run when `cancel` fires.
    ///
    /// Workers still unfinished at that point are stopped and reported as
    /// `Cancelled`.
    pub fn update_with_cancel(
        &self,
        selection: &Selection,
        cancel: &CancelToken,
    ) -> Result<Outputs, KernelError> {
        let names: Vec<String> = selection.keys().cloned().collect();
        let positions: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index))
            .collect();
        let run = Arc::new(Run::new(names.iter().cloned()));

        let mut cycles = find_cycles(selection);
        for (index, name) in names.iter().enumerate() {
            self.retire(name);
            if let Some(path) = cycles.remove(name) {
                warn!(variable = %name, cycle = ?path, "circular dependency");
                run.settle(
                    index,
                    Err(WorkerError::CyclicDependency {
                        name: name.clone(),
                        path,
                    }),
                );
            }
        }

        let (tx, rx) = mpsc::channel();
        {
            let tx = tx.clone();
            cancel.on_cancel(move || {
                let _ = tx.send(Report::Cancelled);
            });
        }

        let mut spawned = 0usize;
        for (index, (name, formula)) in selection.iter().enumerate() {
            if run.result(index).is_some() {
                continue;
            }
            let dependencies = formula
                .dependencies
                .iter()
                .map(|dep| match positions.get(dep.as_str()) {
                    Some(&dep_index) => Dependency::Slot {
                        name: dep.clone(),
                        index: dep_index,
                    },
                    None => Dependency::Missing { name: dep.clone() },
                })
                .collect();
            let task = WorkerTask {
                run: run.clone(),
                index,
                code: formula.code.clone(),
                dependencies,
                evaluator: self.evaluator.clone(),
                report: tx.clone(),
            };

            let spawn = thread::Builder::new()
                .name(format!("calx-worker-{}", name))
                .spawn(move || task.run());
            if let Err(source) = spawn {
                warn!(variable = %name, error = %source, "failed to spawn worker");
                run.stop_all();
                self.forget(&run);
                return Err(KernelError::Spawn {
                    name: name.clone(),
                    source,
                });
            }
            self.active.insert(
                name.clone(),
                WorkerHandle {
                    run: run.clone(),
                    index,
                },
            );
            spawned += 1;
        }
        drop(tx);
        debug!(workers = spawned, variables = run.len(), "update started");

        self.collect(&run, spawned, &rx);
        self.forget(&run);

        let outputs = (0..run.len())
            .filter(|&index| !run.is_superseded(index))
            .map(|index| {
                let result = run.result(index).unwrap_or_else(|| {
                    Err(WorkerError::Stopped {
                        name: run.name(index),
                    })
                });
                (run.name(index), result.map(|value| format_value(&value)))
            })
            .collect();
        Ok(outputs)
    }

    /// Wait for `expected` reports, then stop whatever is left over.
    fn collect(&self, run: &Arc<Run>, expected: usize, rx: &mpsc::Receiver<Report>) {
        let deadline = Instant::now() + self.config.max_wait();
        let mut reported = 0usize;

        while reported < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Report::Done(index)) => {
                    debug!(worker = %run.name(index), "worker reported");
                    reported += 1;
                }
                Ok(Report::Cancelled) => {
                    debug!("update cancelled");
                    for index in 0..run.len() {
                        run.stop_with(index, |name| WorkerError::Cancelled { name });
                    }
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        pending = expected - reported,
                        max_wait_ms = self.config.max_wait_ms,
                        "update timed out"
                    );
                    for index in 0..run.len() {
                        run.stop_with(index, |name| WorkerError::Timeout { name });
                    }
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Stop a previous run's worker holding `name` and give it a moment to exit.
    fn retire(&self, name: &str) {
        let Some((_, handle)) = self.active.remove(name) else {
            return;
        };
        handle.stop();
        if !handle.wait_stopped(self.config.stop_grace()) {
            warn!(worker = %name, "previous worker did not stop in time");
        }
    }

    /// Drop this run's finished workers from the active table.
    fn forget(&self, run: &Arc<Run>) {
        self.active
            .retain(|_, handle| !(handle.belongs_to(run) && handle.state() == WorkerState::Stopped));
    }

    /// Stop the worker named `name`, if any. Stopping twice is harmless.
    pub fn stop(&self, name: &str) {
        let handle = self.active.get(name).map(|entry| entry.value().clone());
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Retarget an in-flight worker to a new name without restarting it.
    ///
    /// Returns `false` if no worker holds `old_name` or `new_name` is busy.
    /// A finished worker of the same run that still holds `new_name` drops
    /// out of that run's outputs.
    pub fn rename(&self, old_name: &str, new_name: &str) -> bool {
        if old_name == new_name {
            return self.active.contains_key(old_name);
        }
        let busy = self
            .active
            .get(new_name)
            .is_some_and(|entry| entry.value().state() != WorkerState::Stopped);
        if busy {
            return false;
        }
        let Some(handle) = self.active.get(old_name).map(|entry| entry.value().clone()) else {
            return false;
        };
        if !handle.rename(new_name) {
            return false;
        }
        self.active.remove(old_name);
        debug!(%old_name, %new_name, "worker renamed");
        self.active.insert(new_name.to_string(), handle);
        true
    }

    /// Names of workers that have not reached `Stopped`.
    pub fn active_workers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .active
            .iter()
            .filter(|entry| entry.value().state() != WorkerState::Stopped)
            .map(|entry| entry.value().name())
            .collect();
        names.sort();
        names
    }

    /// Current state of the worker named `name`.
    pub fn worker_state(&self, name: &str) -> Option<WorkerState> {
        self.active.get(name).map(|entry| entry.value().state())
    }

    /// Evaluate every variable in `registry` and store each result back on
    /// its variable.
    pub fn update_registry(&self, registry: &Registry) -> Result<Outputs, KernelError> {
        let outputs = self.update(&registry.selection())?;
        for (name, result) in outputs.iter() {
            let Some(id) = registry.lookup(name) else {
                continue;
            };
            let stored = result.clone().map_err(|err| err.to_string());
            if registry.set_output(id, stored).is_err() {
                debug!(variable = %name, "variable deleted before its output was stored");
            }
        }
        Ok(outputs)
    }

    /// Keep in-flight workers in step with registry renames and deletions.
    pub fn follow(self: &Arc<Self>, registry: &Registry) -> [SubscriptionId; 2] {
        let kernel: Weak<Kernel> = Arc::downgrade(self);
        let renamed = registry.subscribe(EventKind::Renamed, Scope::Global, move |event| {
            if let (Some(kernel), Event::Renamed { old_name, new_name, .. }) =
                (kernel.upgrade(), event)
            {
                kernel.rename(old_name, new_name);
            }
        });
        let kernel: Weak<Kernel> = Arc::downgrade(self);
        let deleted = registry.subscribe(EventKind::Deleted, Scope::Global, move |event| {
            if let Some(kernel) = kernel.upgrade() {
                kernel.stop(event.name());
            }
        });
        [renamed, deleted]
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        for entry in self.active.iter() {
            entry.value().stop();
        }
    }
}
