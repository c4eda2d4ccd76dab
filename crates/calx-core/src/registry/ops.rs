use super::{
    Event, EventKind, Listener, Registry, Scope, SubscriptionId, Variable, VariableId, VariableKind,
};
use crate::error::{RegistryError, Result};
use crate::kernel::{Formula, Selection};
use crate::name::validate_name;
use std::sync::Arc;
use tracing::{debug, trace};

impl Registry {
    /// Create a formula variable. Without a name, one is synthesized.
    pub fn create(&self, name: Option<&str>) -> Result<VariableId> {
        self.insert(name, VariableKind::Formula, String::new())
    }

    /// Create an input variable holding `code`. Inputs never take dependencies.
    pub fn create_input(&self, name: Option<&str>, code: &str) -> Result<VariableId> {
        self.insert(name, VariableKind::Input, code.to_string())
    }

    fn insert(&self, name: Option<&str>, kind: VariableKind, code: String) -> Result<VariableId> {
        let _dispatch = self.dispatch.enter();
        let (event, callbacks) = {
            let mut state = self.write();
            let name = match name {
                Some(name) => {
                    validate_name(name)?;
                    if state.names.contains_key(name) {
                        return Err(RegistryError::NameTaken(name.to_string()));
                    }
                    name.to_string()
                }
                None => state.unique_name(),
            };

            let id = VariableId(state.next_id);
            state.next_id += 1;
            state
                .variables
                .insert(id, Variable::new(id, name.clone(), kind, code));
            state.names.insert(name.clone(), id);
            let callbacks = self.listeners().matching(EventKind::Created, id);
            (Event::Created { id, name }, callbacks)
        };

        let id = event.id();
        debug!(%id, name = %event.name(), ?kind, "variable created");
        deliver(&event, callbacks);
        Ok(id)
    }

    /// The name `create(None)` would currently pick.
    pub fn unique_name(&self) -> String {
        self.read().unique_name()
    }

    /// Rename a variable. Renaming to the current name is a no-op.
    pub fn rename(&self, id: VariableId, new_name: &str) -> Result<()> {
        let _dispatch = self.dispatch.enter();
        let (event, callbacks) = {
            let mut state = self.write();
            let current = state
                .variables
                .get(&id)
                .ok_or(RegistryError::NotFound(id))?
                .name
                .clone();
            if current == new_name {
                return Ok(());
            }
            validate_name(new_name)?;
            if state.names.contains_key(new_name) {
                return Err(RegistryError::NameTaken(new_name.to_string()));
            }

            state.names.remove(&current);
            state.names.insert(new_name.to_string(), id);
            if let Some(var) = state.variables.get_mut(&id) {
                var.name = new_name.to_string();
            }
            debug!(%id, old_name = %current, %new_name, "variable renamed");
            let callbacks = self.listeners().matching(EventKind::Renamed, id);
            let event = Event::Renamed {
                id,
                old_name: current,
                new_name: new_name.to_string(),
            };
            (event, callbacks)
        };

        deliver(&event, callbacks);
        Ok(())
    }

    /// Delete a variable, severing every edge that references it.
    pub fn delete(&self, id: VariableId) -> Result<()> {
        let _dispatch = self.dispatch.enter();
        let (event, callbacks) = {
            let mut state = self.write();
            let var = state
                .variables
                .remove(&id)
                .ok_or(RegistryError::NotFound(id))?;

            for dep in &var.dependencies {
                if let Some(other) = state.variables.get_mut(dep) {
                    other.dependents.remove(&id);
                }
            }
            for dependent in &var.dependents {
                if let Some(other) = state.variables.get_mut(dependent) {
                    other.dependencies.remove(&id);
                }
            }
            state.names.remove(&var.name);

            let mut listeners = self.listeners();
            let callbacks = listeners.matching(EventKind::Deleted, id);
            let dropped = listeners.drop_scoped(id);
            trace!(%id, dropped, "dropped scoped listeners");
            (Event::Deleted { id, name: var.name }, callbacks)
        };

        debug!(%id, name = %event.name(), "variable deleted");
        deliver(&event, callbacks);
        Ok(())
    }

    pub fn code(&self, id: VariableId) -> Result<String> {
        self.with_variable(id, |var| var.code.clone())
    }

    pub fn set_code(&self, id: VariableId, code: &str) -> Result<()> {
        let mut state = self.write();
        let var = state
            .variables
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        var.code = code.to_string();
        Ok(())
    }

    pub fn name(&self, id: VariableId) -> Result<String> {
        self.with_variable(id, |var| var.name.clone())
    }

    pub fn kind(&self, id: VariableId) -> Result<VariableKind> {
        self.with_variable(id, |var| var.kind)
    }

    /// Find a live variable by name.
    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.read().names.get(name).copied()
    }

    /// Cloned snapshot of a variable.
    pub fn get(&self, id: VariableId) -> Result<Variable> {
        self.with_variable(id, Variable::clone)
    }

    pub fn output(&self, id: VariableId) -> Result<Option<String>> {
        self.with_variable(id, |var| var.output.clone())
    }

    pub fn error(&self, id: VariableId) -> Result<Option<String>> {
        self.with_variable(id, |var| var.error.clone())
    }

    /// Record the latest evaluation result. A success clears the last error
    /// and a failure clears the last output.
    pub fn set_output(&self, id: VariableId, result: std::result::Result<String, String>) -> Result<()> {
        let mut state = self.write();
        let var = state
            .variables
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        match result {
            Ok(output) => {
                var.output = Some(output);
                var.error = None;
            }
            Err(error) => {
                var.output = None;
                var.error = Some(error);
            }
        }
        Ok(())
    }

    /// Value stored under `key` on `id`.
    pub fn metadata(&self, id: VariableId, key: &str) -> Result<String> {
        self.with_variable(id, |var| var.metadata.get(key).cloned())?
            .ok_or_else(|| RegistryError::MissingKey {
                id,
                key: key.to_string(),
            })
    }

    /// Store `value` under `key` on `id`, replacing any previous value.
    pub fn set_metadata(&self, id: VariableId, key: &str, value: &str) -> Result<()> {
        let mut state = self.write();
        let var = state
            .variables
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        var.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Make `id` depend on `dependency`. Adding an existing edge is a no-op.
    pub fn add_dependency(&self, id: VariableId, dependency: VariableId) -> Result<()> {
        let mut state = self.write();
        let kind = state
            .variables
            .get(&id)
            .ok_or(RegistryError::NotFound(id))?
            .kind;
        if !state.variables.contains_key(&dependency) {
            return Err(RegistryError::NotFound(dependency));
        }
        if id == dependency {
            return Err(RegistryError::SelfDependency(id));
        }
        if !kind.consumes() {
            return Err(RegistryError::NotConsumer(id));
        }

        if let Some(var) = state.variables.get_mut(&id) {
            var.dependencies.insert(dependency);
        }
        if let Some(dep) = state.variables.get_mut(&dependency) {
            dep.dependents.insert(id);
        }
        Ok(())
    }

    /// Remove the edge `id -> dependency`. Removing an absent edge is a no-op.
    pub fn remove_dependency(&self, id: VariableId, dependency: VariableId) -> Result<()> {
        let mut state = self.write();
        if !state.variables.contains_key(&dependency) {
            return Err(RegistryError::NotFound(dependency));
        }
        let var = state
            .variables
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        var.dependencies.remove(&dependency);
        if let Some(dep) = state.variables.get_mut(&dependency) {
            dep.dependents.remove(&id);
        }
        Ok(())
    }

    pub fn dependencies(&self, id: VariableId) -> Result<Vec<VariableId>> {
        self.with_variable(id, |var| var.dependencies.iter().copied().collect())
    }

    pub fn dependents(&self, id: VariableId) -> Result<Vec<VariableId>> {
        self.with_variable(id, |var| var.dependents.iter().copied().collect())
    }

    /// Identifiers of all live variables.
    pub fn list(&self) -> Vec<VariableId> {
        let mut ids: Vec<VariableId> = self.read().variables.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn count(&self) -> usize {
        self.read().variables.len()
    }

    /// Consistent snapshot of every live variable, keyed by name, with
    /// dependencies resolved to names. This is the kernel's input.
    pub fn selection(&self) -> Selection {
        let state = self.read();
        state
            .variables
            .values()
            .map(|var| {
                let dependencies = var
                    .dependencies
                    .iter()
                    .filter_map(|dep| state.variables.get(dep))
                    .map(|dep| dep.name.clone())
                    .collect();
                (var.name.clone(), Formula::new(&var.code, dependencies))
            })
            .collect()
    }

    /// Register `callback` for `kind` events in `scope`.
    pub fn subscribe<F>(&self, kind: EventKind, scope: Scope, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Listener = Arc::new(callback);
        let mut listeners = self.listeners();
        let id = listeners.insert(kind, scope, callback);
        trace!(%id, ?kind, ?scope, total = listeners.len(), "listener subscribed");
        id
    }

    /// Revoke a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners().remove(id)
    }

    fn with_variable<T>(&self, id: VariableId, f: impl FnOnce(&Variable) -> T) -> Result<T> {
        let state = self.read();
        state
            .variables
            .get(&id)
            .map(f)
            .ok_or(RegistryError::NotFound(id))
    }

}

/// Invoke a listener snapshot. Callers hold the dispatch gate but no lock.
fn deliver(event: &Event, callbacks: Vec<Listener>) {
    trace!(kind = ?event.kind(), id = %event.id(), listeners = callbacks.len(), "notify");
    for callback in callbacks {
        callback(event);
    }
}
