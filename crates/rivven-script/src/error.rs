//! Error types for rivven-script
//!
//! Runtime exceptions raised by user scripts never surface here directly:
//! they are normalized into text at the invocation boundary and only the
//! formatted message is carried by [`ScriptError::Invocation`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors produced by the script bridge
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Configuration error (bad or inconsistent settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config failed validation
    #[error("Configuration error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// No script module was configured
    #[error("Configuration error: no script specified")]
    MissingScript,

    /// The target module could not be located on the search paths
    #[error("Module '{module}' not found (searched: {})", display_paths(.searched))]
    ModuleNotFound {
        module: String,
        searched: Vec<PathBuf>,
    },

    /// The target module failed to compile or its body raised
    #[error("Error loading module '{module}': {message}")]
    ModuleLoad { module: String, message: String },

    /// A required callable is not defined by the module
    #[error("Configuration error: script '{script}' does not define callable '{function}'")]
    MissingCallable { script: String, function: String },

    /// A lifecycle callable raised
    #[error("Exception while calling '{function}': {exception}")]
    Invocation { function: String, exception: String },

    /// Operation not allowed in the current lifecycle state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: BridgeState,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScriptError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a module load error
    pub fn module_load(module: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ModuleLoad {
            module: module.into(),
            message: msg.into(),
        }
    }

    /// Check if this is a configuration-class error
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Validation(_) | Self::MissingScript | Self::MissingCallable { .. }
        )
    }
}

/// Lifecycle state of a script bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// Created, `start` not yet called
    Unstarted,
    /// Loading the module and running `init`
    Starting,
    /// Accepting records
    Ready,
    /// Running `deinit`
    Draining,
    /// Bindings released
    Stopped,
    /// Startup failed; absorbing
    FailedStart,
}

impl BridgeState {
    /// Whether records are accepted in this state
    pub fn accepts_records(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::FailedStart)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
            Self::FailedStart => write!(f, "failed"),
        }
    }
}
