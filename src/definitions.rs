//! Turning `NAME=CODE` arguments into a populated registry.

use calx_core::Registry;
use calx_engine::engine::extract_dependencies;
use tracing::debug;

use crate::error::{CliError, Result};

/// One `NAME=CODE` command line definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub code: String,
}

impl Definition {
    /// Split at the first `=`. The name is trimmed, the code is kept as is.
    pub fn parse(arg: &str) -> Result<Self> {
        let (name, code) = arg
            .split_once('=')
            .ok_or_else(|| CliError::Definition(arg.to_string()))?;
        let name = name.trim();
        if name.is_empty() || code.trim().is_empty() {
            return Err(CliError::Definition(arg.to_string()));
        }
        Ok(Definition {
            name: name.to_string(),
            code: code.to_string(),
        })
    }
}

/// Register every definition, then wire up the dependencies found in its code.
///
/// Definitions that reference no other definition become inputs.
pub fn build_registry(definitions: &[Definition]) -> Result<Registry> {
    let registry = Registry::new();
    let known: Vec<&str> = definitions.iter().map(|def| def.name.as_str()).collect();

    let mut pending = Vec::new();
    for def in definitions {
        let deps = extract_dependencies(&def.code, known.iter().copied(), Some(def.name.as_str()));
        let created = if deps.is_empty() {
            registry.create_input(Some(def.name.as_str()), &def.code)
        } else {
            registry.create(Some(def.name.as_str())).and_then(|id| {
                registry.set_code(id, &def.code)?;
                Ok(id)
            })
        };
        let id = created.map_err(|source| CliError::Register {
            name: def.name.clone(),
            source,
        })?;
        pending.push((id, &def.name, deps));
    }

    for (id, name, deps) in pending {
        debug!(variable = %name, dependencies = ?deps, "wiring dependencies");
        for dep in deps {
            let Some(dep_id) = registry.lookup(&dep) else {
                continue;
            };
            registry
                .add_dependency(id, dep_id)
                .map_err(|source| CliError::Register {
                    name: name.clone(),
                    source,
                })?;
        }
    }
    Ok(registry)
}
