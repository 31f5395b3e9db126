//! Invocation engine
//!
//! Calls a resolved callable with zero or one argument and turns whatever
//! happens into an [`InvocationOutcome`]. Runtime errors stop here: they are
//! formatted, reported once as a diagnostic and never propagated.

use crate::diagnostics::{describe_exception, DiagnosticEvent, Diagnostics};
use crate::error::ScriptError;
use crate::runtime::handle::Interpreter;
use crate::runtime::loader::{Callable, ModuleRef, RECORD_VAR};
use rhai::{Dynamic, EvalAltResult, Scope};

/// Identity attached to invocation diagnostics
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext<'a> {
    pub driver: &'a str,
    pub script: &'a str,
    pub diagnostics: &'a Diagnostics,
}

/// Result of calling a script callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Success,
    Failure { callee: String, exception: String },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Convert into a `Result` for lifecycle calls that must succeed
    pub fn into_result(self) -> crate::error::Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failure { callee, exception } => Err(ScriptError::Invocation {
                function: callee,
                exception,
            }),
        }
    }
}

impl Interpreter {
    /// Call a module callable, discarding its return value
    ///
    /// Script functions are entered through the module's registered entry
    /// scripts with a fresh scope, so they see the module's own imports and
    /// constants and nothing else.
    pub fn call(
        &self,
        module: &ModuleRef,
        callable: &Callable,
        arg: Option<Dynamic>,
    ) -> Result<(), Box<EvalAltResult>> {
        match callable {
            Callable::Function { entry, .. } => {
                let mut scope = Scope::new();
                let with_record = arg.is_some();
                if let Some(value) = arg {
                    scope.push_dynamic(RECORD_VAR, value);
                }
                self.engine
                    .run_ast_with_scope(&mut scope, entry.script(with_record))
            }
            Callable::Pointer(ptr) => {
                let args: Vec<Dynamic> = arg.into_iter().collect();
                ptr.call::<Dynamic>(&self.engine, module.ast(), args)
                    .map(|_| ())
            }
        }
    }
}

/// Invoke `callable` and classify the outcome
///
/// On failure exactly one `InvocationFailed` diagnostic is emitted.
pub fn invoke(
    interpreter: &Interpreter,
    ctx: &InvocationContext<'_>,
    module: &ModuleRef,
    callable: &Callable,
    arg: Option<Dynamic>,
) -> InvocationOutcome {
    match interpreter.call(module, callable, arg) {
        Ok(()) => InvocationOutcome::Success,
        Err(err) => {
            let callee = callable.name().to_string();
            let exception = describe_exception(&err);

            ctx.diagnostics.emit(DiagnosticEvent::InvocationFailed {
                driver: ctx.driver.to_string(),
                script: ctx.script.to_string(),
                function: callee.clone(),
                exception: exception.clone(),
            });

            InvocationOutcome::Failure { callee, exception }
        }
    }
}
