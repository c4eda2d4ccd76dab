//! Formula evaluation API.
//!
//! This module provides everything the scheduler needs to run a formula:
//!
//! - [`Evaluate`] - The evaluation capability injected into the kernel
//! - [`RhaiEvaluator`] - Stock [`Evaluate`] implementation backed by Rhai
//! - [`CancelToken`] - Cooperative stop signal shared with running scripts
//! - [`extract_dependencies`] - Find referenced variable names in formula text
//! - [`format_value`] - Format values for display

mod cancel;
mod deps;
mod eval;
mod format;

pub use cancel::CancelToken;
pub use deps::{extract_dependencies, identifiers};
pub use eval::{Bindings, EvalError, Evaluate, RhaiEvaluator};
pub use format::{format_float, format_value};

pub use rhai::{AST, Dynamic};

/// Values flowing between formulas.
pub type Value = Dynamic;
