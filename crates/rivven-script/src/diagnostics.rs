//! Structured diagnostic events and runtime exception formatting
//!
//! Every failure the bridge absorbs is reported exactly once as a
//! [`DiagnosticEvent`]. Events are always written to `tracing`; hosts (and
//! tests) can additionally observe them through a [`DiagnosticObserver`].
//!
//! ```rust,ignore
//! let observer = Arc::new(CollectingObserver::new());
//! let bridge = ScriptBridge::builder(config)
//!     .observer(observer.clone())
//!     .build();
//!
//! bridge.insert(&record);
//! assert_eq!(observer.invocation_failures().len(), 1);
//! ```

use parking_lot::Mutex;
use rhai::EvalAltResult;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Placeholder for callables without a discoverable name
pub const UNKNOWN_CALLABLE: &str = "<unknown>";

/// A diagnostic emitted by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// Startup attempted without a script
    MissingScript { driver: String },
    /// Startup rejected by configuration
    ConfigError { driver: String, message: String },
    /// An auxiliary import failed (non-fatal)
    ImportFailed {
        driver: String,
        module: String,
        error: String,
    },
    /// The script module failed to load
    ModuleLoadFailed {
        driver: String,
        module: String,
        error: String,
    },
    /// A script callable raised
    InvocationFailed {
        driver: String,
        script: String,
        function: String,
        exception: String,
    },
    /// A record could not be marshalled and the policy surfaces it
    MarshalFailed {
        driver: String,
        script: String,
        seq_num: u64,
        error: String,
    },
    /// The bridge reached `Ready`
    Started { driver: String, script: String },
    /// The bridge reached `Stopped`
    Stopped { driver: String, script: String },
}

impl DiagnosticEvent {
    /// Short machine-readable name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingScript { .. } => "missing_script",
            Self::ConfigError { .. } => "config_error",
            Self::ImportFailed { .. } => "import_failed",
            Self::ModuleLoadFailed { .. } => "module_load_failed",
            Self::InvocationFailed { .. } => "invocation_failed",
            Self::MarshalFailed { .. } => "marshal_failed",
            Self::Started { .. } => "started",
            Self::Stopped { .. } => "stopped",
        }
    }

    /// Driver that emitted the event
    pub fn driver(&self) -> &str {
        match self {
            Self::MissingScript { driver }
            | Self::ConfigError { driver, .. }
            | Self::ImportFailed { driver, .. }
            | Self::ModuleLoadFailed { driver, .. }
            | Self::InvocationFailed { driver, .. }
            | Self::MarshalFailed { driver, .. }
            | Self::Started { driver, .. }
            | Self::Stopped { driver, .. } => driver,
        }
    }

    /// Callable named by the event, if any
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::InvocationFailed { function, .. } => Some(function),
            _ => None,
        }
    }

    /// Whether this event reports a failure
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Started { .. } | Self::Stopped { .. })
    }

    /// Write the event to the tracing subscriber
    pub fn log(&self) {
        match self {
            Self::MissingScript { driver } => {
                error!(driver = %driver, "Error initializing script destination: no script specified");
            }
            Self::ConfigError { driver, message } => {
                error!(driver = %driver, error = %message, "Error initializing script destination");
            }
            Self::ImportFailed {
                driver,
                module,
                error,
            } => {
                warn!(driver = %driver, module = %module, error = %error, "Error importing script module");
            }
            Self::ModuleLoadFailed {
                driver,
                module,
                error,
            } => {
                error!(driver = %driver, module = %module, error = %error, "Error loading script module");
            }
            Self::InvocationFailed {
                driver,
                script,
                function,
                exception,
            } => {
                error!(
                    driver = %driver,
                    script = %script,
                    function = %function,
                    exception = %exception,
                    "Exception while calling a script function"
                );
            }
            Self::MarshalFailed {
                driver,
                script,
                seq_num,
                error,
            } => {
                error!(
                    driver = %driver,
                    script = %script,
                    seq_num = seq_num,
                    error = %error,
                    "Error marshalling record for script"
                );
            }
            Self::Started { driver, script } => {
                info!(driver = %driver, script = %script, "Initializing script destination");
            }
            Self::Stopped { driver, script } => {
                info!(driver = %driver, script = %script, "Script destination stopped");
            }
        }
    }
}

/// Receives diagnostic events in addition to the tracing output
pub trait DiagnosticObserver: Send + Sync {
    /// Called once per emitted event
    fn observe(&self, event: &DiagnosticEvent);
}

/// Event emitter owned by a bridge
#[derive(Clone, Default)]
pub struct Diagnostics {
    observer: Option<Arc<dyn DiagnosticObserver>>,
}

impl Diagnostics {
    /// Emitter that only logs
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitter that logs and forwards to `observer`
    pub fn with_observer(observer: Arc<dyn DiagnosticObserver>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    /// Log and forward an event
    pub fn emit(&self, event: DiagnosticEvent) {
        event.log();
        if let Some(observer) = &self.observer {
            observer.observe(&event);
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Observer that keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl CollectingObserver {
    /// Create an empty observer
    pub fn new() -> Self {
        Self::default()
    }

    /// All events observed so far
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Events of the given kind
    pub fn of_kind(&self, kind: &str) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// `InvocationFailed` events
    pub fn invocation_failures(&self) -> Vec<DiagnosticEvent> {
        self.of_kind("invocation_failed")
    }

    /// Number of events observed
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was observed
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forget all events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticObserver for CollectingObserver {
    fn observe(&self, event: &DiagnosticEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Strip call/module wrappers down to the error actually raised
pub fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, ..)
        | EvalAltResult::ErrorInModule(_, inner, ..) => root_cause(inner),
        _ => err,
    }
}

/// Exception class name for a runtime error
pub fn exception_kind(err: &EvalAltResult) -> &'static str {
    match root_cause(err) {
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        EvalAltResult::ErrorParsing(..) => "ParseError",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorModuleNotFound(..) => "ModuleNotFound",
        EvalAltResult::ErrorMismatchDataType(..) | EvalAltResult::ErrorMismatchOutputType(..) => {
            "TypeError"
        }
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => "IndexError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataTooLarge(..) => "ResourceLimitError",
        EvalAltResult::ErrorTerminated(..) => "Terminated",
        EvalAltResult::ErrorSystem(..) => "SystemError",
        _ => "ScriptError",
    }
}

/// Render a runtime error as `Kind: message`
///
/// For a thrown value the message is the value itself, so `throw "boom"`
/// renders as `RuntimeError: boom`.
pub fn describe_exception(err: &EvalAltResult) -> String {
    let cause = root_cause(err);
    let message = match cause {
        EvalAltResult::ErrorRuntime(value, ..) => value.to_string(),
        other => other.to_string(),
    };
    format!("{}: {}", exception_kind(cause), message)
}
