//! Formula evaluation capability.
//!
//! The scheduler only needs "evaluate this code with these named inputs".
//! [`Evaluate`] is that seam; [`RhaiEvaluator`] is the stock implementation.
//!
//! Each call to [`RhaiEvaluator::evaluate`] builds its own Rhai engine, so
//! concurrent workers never share interpreter state. Bindings are pushed as
//! constants: a formula can read its dependencies but never reassign them.

use std::collections::BTreeMap;

use rhai::{Engine, EvalAltResult, Scope};
use thiserror::Error;
use tracing::{debug, trace};

use super::{AST, CancelToken, Dynamic, Value};

/// Named input values for one evaluation.
pub type Bindings = BTreeMap<String, Value>;

/// Errors returned by an evaluation capability.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Rhai error: {0}")]
    Script(#[source] Box<EvalAltResult>),

    #[error("Evaluation terminated")]
    Terminated,

    #[error("Evaluation panicked: {0}")]
    Panicked(String),

    #[error("Error in custom functions: {0}")]
    Functions(String),
}

impl From<Box<EvalAltResult>> for EvalError {
    fn from(err: Box<EvalAltResult>) -> Self {
        match *err {
            EvalAltResult::ErrorTerminated(..) => EvalError::Terminated,
            _ => EvalError::Script(err),
        }
    }
}

/// Evaluate a code fragment against a set of named inputs.
///
/// Implementations are called concurrently, once per worker, and must either
/// keep independent state per call or serialize access internally.
/// `cancel` is set when the caller no longer wants the result; long running
/// implementations should poll it and return [`EvalError::Terminated`].
pub trait Evaluate: Send + Sync {
    fn evaluate(
        &self,
        code: &str,
        bindings: &Bindings,
        cancel: &CancelToken,
    ) -> Result<Value, EvalError>;
}

impl<F> Evaluate for F
where
    F: Fn(&str, &Bindings, &CancelToken) -> Result<Value, EvalError> + Send + Sync,
{
    fn evaluate(
        &self,
        code: &str,
        bindings: &Bindings,
        cancel: &CancelToken,
    ) -> Result<Value, EvalError> {
        self(code, bindings, cancel)
    }
}

/// Rhai-backed evaluation capability.
#[derive(Clone, Debug, Default)]
pub struct RhaiEvaluator {
    /// Operation budget per evaluation; 0 means unlimited.
    max_operations: u64,
    /// Compiled custom functions available to every formula.
    custom_ast: Option<AST>,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an evaluator whose formulas can call the functions defined in
    /// `custom_script`.
    pub fn with_functions(custom_script: &str) -> Result<Self, EvalError> {
        let engine = Engine::new();
        let ast = engine
            .compile(custom_script)
            .map_err(|e| EvalError::Functions(e.to_string()))?;
        debug!(functions = ast.iter_functions().count(), "custom functions compiled");
        Ok(RhaiEvaluator {
            max_operations: 0,
            custom_ast: Some(ast),
        })
    }

    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    fn create_engine(&self, cancel: &CancelToken) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.max_operations);

        let cancel = cancel.clone();
        engine.on_progress(move |_ops| {
            if cancel.is_cancelled() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });
        engine
    }
}

impl Evaluate for RhaiEvaluator {
    fn evaluate(
        &self,
        code: &str,
        bindings: &Bindings,
        cancel: &CancelToken,
    ) -> Result<Value, EvalError> {
        trace!(bindings = bindings.len(), "evaluating formula");
        let engine = self.create_engine(cancel);

        let mut scope = Scope::new();
        for (name, value) in bindings {
            scope.push_constant_dynamic(name.as_str(), value.clone());
        }

        let value = match &self.custom_ast {
            Some(custom_ast) => {
                let formula_ast = engine.compile_with_scope(&scope, code).map_err(|e| {
                    let parse_type = *e.0;
                    let pos = e.1;
                    Box::new(EvalAltResult::ErrorParsing(parse_type, pos))
                })?;
                let merged = custom_ast.clone().merge(&formula_ast);
                engine.eval_ast_with_scope::<Dynamic>(&mut scope, &merged)?
            }
            None => engine.eval_with_scope::<Dynamic>(&mut scope, code)?,
        };
        Ok(value)
    }
}
