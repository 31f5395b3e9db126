//! Embedded script runtime
//!
//! - [`RuntimeHandle`]: the process-wide lock in front of the engine
//! - [`ModuleLoader`]: locating script modules on the search paths
//! - [`invoke`]: calling resolved callables and classifying the outcome

mod handle;
mod invoke;
mod loader;

pub use handle::{Interpreter, RuntimeGuard, RuntimeHandle, RuntimeHandleBuilder};
pub use invoke::{invoke, InvocationContext, InvocationOutcome};
pub use loader::{Callable, EntryPoints, ModuleLoader, ModuleRef};
