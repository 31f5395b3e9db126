//! rivven-script - Scriptable sink bridge for Rivven
//!
//! Hands records from a multi-threaded sink host, one at a time, to
//! user-defined callables in an embedded [Rhai](https://rhai.rs) runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  host worker threads ── insert(record) ──┐                   │
//! │                                          ▼                   │
//! │  ScriptBridge (lifecycle, bindings, error policy)            │
//! │     │  acquire                                               │
//! │     ▼                                                        │
//! │  RuntimeHandle (one lock) ── Interpreter                     │
//! │     ├── ModuleLoader     locate / load / resolve / import    │
//! │     ├── ValueMarshaller  Record → rhai::Map                  │
//! │     └── invoke           call + exception classification     │
//! │                                                              │
//! │  Diagnostics ── tracing + optional DiagnosticObserver        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use rivven_script::prelude::*;
//!
//! let config = BridgeConfig::from_yaml(r#"
//! script: handlers.audit
//! init_func: init
//! deinit_func: deinit
//! on_error: fallback-to-string
//! "#)?;
//!
//! let bridge = ScriptBridge::new(config);
//! if bridge.start() {
//!     let result = bridge.insert(&record!({"host": "web-1", "severity": 3}));
//!     assert!(result.is_success());
//!     bridge.stop();
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod marshal;
pub mod record;
pub mod runtime;

pub use bridge::{ResolvedBindings, ScriptBridge, ScriptBridgeBuilder};
pub use config::{
    BridgeConfig, BridgeConfigBuilder, ErrorAction, OnError, RuntimeConfig, TemplateOptions,
};
pub use diagnostics::{
    describe_exception, exception_kind, CollectingObserver, DiagnosticEvent, DiagnosticObserver,
    Diagnostics, UNKNOWN_CALLABLE,
};
pub use driver::{ThreadedDestination, WorkerInsertResult};
pub use error::{BridgeState, Result, ScriptError};
pub use marshal::{JsonMarshaller, MarshalContext, MarshalError, ValueMarshaller};
pub use record::Record;
pub use runtime::{
    Callable, EntryPoints, InvocationContext, InvocationOutcome, ModuleLoader, ModuleRef,
    RuntimeGuard, RuntimeHandle, RuntimeHandleBuilder,
};

// Re-export the embedded engine for hosts registering native functions
pub use rhai;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        record, BridgeConfig, BridgeState, CollectingObserver, DiagnosticEvent,
        DiagnosticObserver, JsonMarshaller, OnError, Record, RuntimeConfig, RuntimeHandle,
        ScriptBridge, ScriptError, TemplateOptions, ThreadedDestination, ValueMarshaller,
        WorkerInsertResult,
    };
}
