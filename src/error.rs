//! Error types for the calx command line

use std::path::PathBuf;

use calx_core::{ConfigError, KernelError, RegistryError};
use calx_engine::engine::EvalError;
use thiserror::Error;

/// Errors that stop the command before any formula is evaluated
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("Invalid definition '{0}': expected NAME=CODE")]
    Definition(String),

    #[error("Cannot define '{name}': {source}")]
    Register {
        name: String,
        #[source]
        source: RegistryError,
    },

    #[error("Failed to load config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("Failed to read functions file {}: {source}", path.display())]
    Functions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("Evaluation aborted: {0}")]
    Kernel(#[from] KernelError),
}

pub type Result<T> = std::result::Result<T, CliError>;
