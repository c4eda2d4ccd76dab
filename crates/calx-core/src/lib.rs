//! calx-core - UI-agnostic variable registry + evaluation kernel.

pub mod config;
pub mod error;
pub mod kernel;
pub mod name;
pub mod registry;

pub use config::{Config, EngineConfig, KernelConfig};
pub use error::{ConfigError, KernelError, NameError, RegistryError, Result, WorkerError};
pub use kernel::{ERROR_MARKER, Formula, Kernel, Outputs, Selection, WorkerState};
pub use name::{is_valid_name, validate_name};
pub use registry::{Event, EventKind, Registry, Scope, SubscriptionId, Variable, VariableId, VariableKind};

pub use calx_engine::engine::{CancelToken, Evaluate, RhaiEvaluator};
