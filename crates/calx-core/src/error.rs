//! Error types for calx core.

use thiserror::Error;

use crate::registry::VariableId;

/// A candidate variable name broke the naming rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Name is empty")]
    Empty,

    #[error("\"{ch}\" is not a valid 1st character")]
    InvalidFirst { ch: char },

    #[error("\"{ch}\" is not a valid character (position {index})")]
    InvalidChar { ch: char, index: usize },
}

/// Errors returned by registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("The name {0} is taken")]
    NameTaken(String),

    #[error("Variable {0} does not exist")]
    NotFound(VariableId),

    #[error("Variable {0} cannot depend on itself")]
    SelfDependency(VariableId),

    #[error("Variable {0} does not accept dependencies")]
    NotConsumer(VariableId),

    #[error("Variable {id} does not have key {key}")]
    MissingKey { id: VariableId, key: String },
}

/// Failure of a single worker. Only ever affects that variable's output slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("{name}: dependency {dependency} is missing")]
    MissingDependency { name: String, dependency: String },

    #[error("{name}: failed to run due to input error from {dependency}")]
    DependencyFailed { name: String, dependency: String },

    #[error("{name}: circular dependency detected ({})", path.join(" -> "))]
    CyclicDependency { name: String, path: Vec<String> },

    #[error("{name}: {message}")]
    Evaluation { name: String, message: String },

    #[error("{name}: worker stopped")]
    Stopped { name: String },

    #[error("{name}: update cancelled")]
    Cancelled { name: String },

    #[error("{name}: timed out waiting for result")]
    Timeout { name: String },
}

/// Errors that abort a whole kernel update.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Failed to spawn worker for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading kernel configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Refusing to read config: file too large ({size} bytes, max {max})")]
    TooLarge { size: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
