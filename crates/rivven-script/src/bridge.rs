//! Script bridge: lifecycle controller for one script destination
//!
//! A [`ScriptBridge`] owns the resolved bindings of one user module and
//! drives them through the host's start / insert / stop sequence:
//!
//! ```text
//! Unstarted → Starting → Ready → Draining → Stopped
//!                 └────→ FailedStart
//! ```
//!
//! Every interaction with the script runtime happens while the shared
//! [`RuntimeHandle`] is held. Lock order is always runtime handle first,
//! then the bridge's own state/bindings locks; start and stop are further
//! serialized against each other by a lifecycle mutex.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = BridgeConfig::builder("handlers.audit")
//!     .init_func("init")
//!     .deinit_func("deinit")
//!     .build();
//!
//! let bridge = ScriptBridge::new(config);
//! if bridge.start() {
//!     bridge.insert(&record!({"host": "web-1"}));
//!     bridge.stop();
//! }
//! ```

use crate::config::BridgeConfig;
use crate::diagnostics::{describe_exception, DiagnosticEvent, DiagnosticObserver, Diagnostics};
use crate::driver::WorkerInsertResult;
use crate::error::{BridgeState, Result, ScriptError};
use crate::marshal::{JsonMarshaller, MarshalContext, ValueMarshaller};
use crate::record::Record;
use crate::runtime::{
    invoke, Callable, InvocationContext, InvocationOutcome, Interpreter, ModuleRef, RuntimeHandle,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

/// Callables resolved from the user module
///
/// Created while starting and released, with the runtime handle held, when
/// the bridge stops. Never shared between bridges.
#[derive(Debug)]
pub struct ResolvedBindings {
    module: Arc<ModuleRef>,
    init: Option<Callable>,
    queue: Callable,
    deinit: Option<Callable>,
}

impl ResolvedBindings {
    /// The loaded module
    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    pub fn init(&self) -> Option<&Callable> {
        self.init.as_ref()
    }

    pub fn queue(&self) -> &Callable {
        &self.queue
    }

    pub fn deinit(&self) -> Option<&Callable> {
        self.deinit.as_ref()
    }
}

/// A script destination
pub struct ScriptBridge {
    config: BridgeConfig,
    id: String,
    runtime: Arc<RuntimeHandle>,
    marshaller: Arc<dyn ValueMarshaller>,
    diagnostics: Diagnostics,
    state: RwLock<BridgeState>,
    bindings: RwLock<Option<Arc<ResolvedBindings>>>,
    lifecycle: Mutex<()>,
    seq_num: AtomicU64,
}

impl ScriptBridge {
    /// Create a bridge on the shared runtime with the default marshaller
    pub fn new(config: BridgeConfig) -> Self {
        Self::builder(config).build()
    }

    /// Create a builder
    pub fn builder(config: BridgeConfig) -> ScriptBridgeBuilder {
        ScriptBridgeBuilder::new(config)
    }

    /// Driver identity used in diagnostics
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The runtime this bridge executes on
    pub fn runtime(&self) -> &Arc<RuntimeHandle> {
        &self.runtime
    }

    /// Resolved bindings, present only while `Ready`
    pub fn bindings(&self) -> Option<Arc<ResolvedBindings>> {
        self.bindings.read().clone()
    }

    /// Number of records submitted while `Ready`
    pub fn seq_num(&self) -> u64 {
        self.seq_num.load(Ordering::Relaxed)
    }

    fn script(&self) -> &str {
        self.config.script_name().unwrap_or_default()
    }

    fn set_state(&self, state: BridgeState) {
        let mut current = self.state.write();
        debug!(driver = %self.id, from = %*current, to = %state, "Script destination state change");
        *current = state;
    }

    /// Start the bridge: load the module, resolve callables and run `init`
    ///
    /// Only allowed once, from `Unstarted`. Any failure leaves the bridge
    /// in `FailedStart`.
    pub fn try_start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let state = self.state();
        if state != BridgeState::Unstarted {
            return Err(ScriptError::InvalidState {
                operation: "start",
                state,
            });
        }
        self.set_state(BridgeState::Starting);

        match self.start_inner() {
            Ok(()) => {
                self.set_state(BridgeState::Ready);
                self.diagnostics.emit(DiagnosticEvent::Started {
                    driver: self.id.clone(),
                    script: self.script().to_string(),
                });
                Ok(())
            }
            Err(err) => {
                self.set_state(BridgeState::FailedStart);
                Err(err)
            }
        }
    }

    fn start_inner(&self) -> Result<()> {
        let Some(script) = self.config.script_name() else {
            self.diagnostics.emit(DiagnosticEvent::MissingScript {
                driver: self.id.clone(),
            });
            return Err(ScriptError::MissingScript);
        };

        if let Err(errors) = self.config.validate() {
            self.diagnostics.emit(DiagnosticEvent::ConfigError {
                driver: self.id.clone(),
                message: errors.to_string(),
            });
            return Err(errors.into());
        }

        let rt = self.runtime.acquire();

        for module in &self.config.imports {
            if let Err(err) = rt.import(module.trim()) {
                self.diagnostics.emit(DiagnosticEvent::ImportFailed {
                    driver: self.id.clone(),
                    module: module.clone(),
                    error: describe_exception(&err),
                });
            }
        }

        let module = match rt.load_module(script) {
            Ok(module) => Arc::new(module),
            Err(err) => {
                self.diagnostics.emit(DiagnosticEvent::ModuleLoadFailed {
                    driver: self.id.clone(),
                    module: script.to_string(),
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let bindings = self.resolve_bindings(&rt, module, script)?;

        if let Some(init) = bindings.init() {
            let ctx = self.invocation_context();
            invoke(&rt, &ctx, bindings.module(), init, None).into_result()?;
        }

        *self.bindings.write() = Some(Arc::new(bindings));
        drop(rt);

        info!(
            driver = %self.id,
            script = %script,
            init = ?self.config.init_func,
            queue = %self.config.queue_func,
            deinit = ?self.config.deinit_func,
            "Script destination bound"
        );
        Ok(())
    }

    fn resolve_bindings(
        &self,
        rt: &Interpreter,
        module: Arc<ModuleRef>,
        script: &str,
    ) -> Result<ResolvedBindings> {
        let Some(queue) = rt.resolve(&module, Some(self.config.queue_func.as_str())) else {
            let err = ScriptError::MissingCallable {
                script: script.to_string(),
                function: self.config.queue_func.clone(),
            };
            self.diagnostics.emit(DiagnosticEvent::ConfigError {
                driver: self.id.clone(),
                message: err.to_string(),
            });
            return Err(err);
        };

        let init = rt.resolve(&module, self.config.init_func.as_deref());
        let deinit = rt.resolve(&module, self.config.deinit_func.as_deref());

        for (role, configured, resolved) in [
            ("init", &self.config.init_func, &init),
            ("deinit", &self.config.deinit_func, &deinit),
        ] {
            match (configured, resolved) {
                (Some(name), None) if !name.trim().is_empty() => {
                    warn!(driver = %self.id, script = %script, function = %name, "Configured {} callable not found, skipping", role);
                }
                (_, Some(callable)) if !callable.accepts(0) => {
                    warn!(driver = %self.id, function = %callable.name(), "{} callable does not take zero arguments", role);
                }
                _ => {}
            }
        }
        if !queue.accepts(1) {
            warn!(driver = %self.id, function = %queue.name(), "queue callable does not take one argument");
        }

        Ok(ResolvedBindings {
            module,
            init,
            queue,
            deinit,
        })
    }

    /// Start the bridge, reporting success as a flag
    pub fn start(&self) -> bool {
        self.try_start().is_ok()
    }

    /// Deliver one record to the queue callable
    ///
    /// Safe to call from any number of threads. Records submitted outside
    /// `Ready` are dropped.
    pub fn insert(&self, record: &Record) -> WorkerInsertResult {
        if !self.state().accepts_records() {
            debug!(driver = %self.id, state = %self.state(), "Dropping record, script destination not ready");
            return WorkerInsertResult::Drop;
        }

        let rt = self.runtime.acquire();

        // stop may have won the race for the runtime
        let bindings = match (self.state(), self.bindings()) {
            (BridgeState::Ready, Some(bindings)) => bindings,
            _ => return WorkerInsertResult::Drop,
        };

        let seq_num = self.seq_num.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = MarshalContext {
            driver: &self.id,
            seq_num,
            on_error: self.config.on_error,
            options: &self.config.template,
        };

        let value = match self.marshaller.marshal(record, &ctx) {
            Ok(value) => value,
            Err(err) => {
                if self.config.on_error.drops_message() {
                    if !self.config.on_error.is_silent() {
                        debug!(driver = %self.id, seq_num = seq_num, error = %err, "Dropping record that cannot be marshalled");
                    }
                } else {
                    self.diagnostics.emit(DiagnosticEvent::MarshalFailed {
                        driver: self.id.clone(),
                        script: self.script().to_string(),
                        seq_num,
                        error: err.to_string(),
                    });
                }
                return WorkerInsertResult::Drop;
            }
        };

        let ictx = self.invocation_context();
        match invoke(&rt, &ictx, bindings.module(), bindings.queue(), Some(value)) {
            InvocationOutcome::Success => WorkerInsertResult::Success,
            InvocationOutcome::Failure { .. } => WorkerInsertResult::Drop,
        }
    }

    /// Stop the bridge: run `deinit` and release the bindings
    ///
    /// Stopping an already stopped (or never started) bridge is a no-op.
    pub fn try_stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        match self.state() {
            BridgeState::Ready => {}
            BridgeState::Unstarted => {
                self.set_state(BridgeState::Stopped);
                return Ok(());
            }
            BridgeState::Stopped | BridgeState::FailedStart => return Ok(()),
            state => {
                return Err(ScriptError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        }

        self.set_state(BridgeState::Draining);

        let rt = self.runtime.acquire();
        let released = self.bindings.write().take();
        if let Some(bindings) = &released {
            if let Some(deinit) = bindings.deinit() {
                let ctx = self.invocation_context();
                if !invoke(&rt, &ctx, bindings.module(), deinit, None).is_success() {
                    warn!(driver = %self.id, "Script deinit failed, continuing shutdown");
                }
            }
        }
        drop(released);
        drop(rt);

        self.set_state(BridgeState::Stopped);
        self.diagnostics.emit(DiagnosticEvent::Stopped {
            driver: self.id.clone(),
            script: self.script().to_string(),
        });
        Ok(())
    }

    /// Stop the bridge, reporting success as a flag
    pub fn stop(&self) -> bool {
        self.try_stop().is_ok()
    }

    /// Statistics key: `script,<script>,<init>,<queue>,<deinit>`
    pub fn stats_instance(&self) -> String {
        let (script, init, queue, deinit) = identity(&self.config);
        format!("script,{},{},{},{}", script, init, queue, deinit)
    }

    /// Persistence key: `script(<script>,<init>,<queue>,<deinit>)`
    pub fn persist_name(&self) -> String {
        persist_name(&self.config)
    }

    fn invocation_context(&self) -> InvocationContext<'_> {
        InvocationContext {
            driver: &self.id,
            script: self.script(),
            diagnostics: &self.diagnostics,
        }
    }
}

fn identity(config: &BridgeConfig) -> (&str, &str, &str, &str) {
    (
        config.script.as_deref().unwrap_or_default(),
        config.init_func.as_deref().unwrap_or_default(),
        config.queue_func.as_str(),
        config.deinit_func.as_deref().unwrap_or_default(),
    )
}

fn persist_name(config: &BridgeConfig) -> String {
    let (script, init, queue, deinit) = identity(config);
    format!("script({},{},{},{})", script, init, queue, deinit)
}

impl Drop for ScriptBridge {
    fn drop(&mut self) {
        if self.bindings.get_mut().is_some() {
            let _rt = self.runtime.acquire();
            self.bindings.get_mut().take();
        }
    }
}

impl std::fmt::Debug for ScriptBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBridge")
            .field("id", &self.id)
            .field("script", &self.config.script)
            .field("state", &self.state())
            .field("seq_num", &self.seq_num())
            .finish()
    }
}

/// Builder for [`ScriptBridge`]
pub struct ScriptBridgeBuilder {
    config: BridgeConfig,
    runtime: Option<Arc<RuntimeHandle>>,
    marshaller: Option<Arc<dyn ValueMarshaller>>,
    observer: Option<Arc<dyn DiagnosticObserver>>,
}

impl ScriptBridgeBuilder {
    /// Create a new builder
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            runtime: None,
            marshaller: None,
            observer: None,
        }
    }

    /// Run on an explicit runtime instead of the process-wide one
    pub fn runtime(mut self, runtime: Arc<RuntimeHandle>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Replace the record marshaller
    pub fn marshaller(mut self, marshaller: Arc<dyn ValueMarshaller>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    /// Forward diagnostics to an observer
    pub fn observer(mut self, observer: Arc<dyn DiagnosticObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the bridge
    pub fn build(self) -> ScriptBridge {
        let id = self
            .config
            .id
            .clone()
            .unwrap_or_else(|| persist_name(&self.config));

        ScriptBridge {
            id,
            runtime: self.runtime.unwrap_or_else(RuntimeHandle::shared),
            marshaller: self
                .marshaller
                .unwrap_or_else(|| Arc::new(JsonMarshaller::new())),
            diagnostics: match self.observer {
                Some(observer) => Diagnostics::with_observer(observer),
                None => Diagnostics::new(),
            },
            config: self.config,
            state: RwLock::new(BridgeState::Unstarted),
            bindings: RwLock::new(None),
            lifecycle: Mutex::new(()),
            seq_num: AtomicU64::new(0),
        }
    }
}
