//! Configuration types for rivven-script
//!
//! `BridgeConfig` describes one script destination: which module to load,
//! which callables to bind and how marshalling errors are handled.
//! `RuntimeConfig` describes the embedded runtime shared by bridges.
//!
//! ```yaml
//! id: d_script
//! script: handlers.audit
//! init_func: init
//! queue_func: queue
//! deinit_func: deinit
//! imports: [serializers]
//! on_error: fallback-to-string
//! template:
//!   max_depth: 16
//! ```

use crate::error::{Result, ScriptError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::{Validate, ValidationError};

/// Script destination configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct BridgeConfig {
    /// Driver identity used in diagnostics (defaults to the persist name)
    #[serde(default)]
    #[validate(length(min = 1))]
    pub id: Option<String>,

    /// Module name (`pkg.module`) or path to a script file
    #[serde(default, alias = "script_path")]
    pub script: Option<String>,

    /// Callable invoked once at startup
    #[serde(default)]
    #[validate(length(min = 1))]
    pub init_func: Option<String>,

    /// Callable invoked once per record
    #[serde(default = "default_queue_func")]
    #[validate(length(min = 1))]
    pub queue_func: String,

    /// Callable invoked once at shutdown
    #[serde(default)]
    #[validate(length(min = 1))]
    pub deinit_func: Option<String>,

    /// Modules imported (best effort) before the script is loaded
    #[serde(default)]
    #[validate(custom(function = "validate_module_names"))]
    pub imports: Vec<String>,

    /// Marshalling error policy
    #[serde(default)]
    pub on_error: OnError,

    /// Options forwarded to the value marshaller
    #[serde(default)]
    #[validate(nested)]
    pub template: TemplateOptions,
}

fn default_queue_func() -> String {
    "queue".to_string()
}

#[allow(clippy::ptr_arg)] // signature dictated by the validator derive
fn validate_module_names(names: &Vec<String>) -> std::result::Result<(), ValidationError> {
    if names.iter().any(|n| n.trim().is_empty()) {
        return Err(ValidationError::new("empty_module_name"));
    }
    Ok(())
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            id: None,
            script: None,
            init_func: None,
            queue_func: default_queue_func(),
            deinit_func: None,
            imports: Vec::new(),
            on_error: OnError::default(),
            template: TemplateOptions::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a builder for the given script module
    pub fn builder(script: impl Into<String>) -> BridgeConfigBuilder {
        BridgeConfigBuilder::new(script)
    }

    /// Parse a YAML fragment
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ScriptError::config(format!("invalid script destination config: {}", e)))
    }

    /// The configured script, if non-blank
    pub fn script_name(&self) -> Option<&str> {
        self.script.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Fluent builder for [`BridgeConfig`]
#[derive(Debug, Clone)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            config: BridgeConfig {
                script: Some(script.into()),
                ..Default::default()
            },
        }
    }

    /// Set the driver id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = Some(id.into());
        self
    }

    /// Set the init callable name
    pub fn init_func(mut self, name: impl Into<String>) -> Self {
        self.config.init_func = Some(name.into());
        self
    }

    /// Set the queue callable name
    pub fn queue_func(mut self, name: impl Into<String>) -> Self {
        self.config.queue_func = name.into();
        self
    }

    /// Set the deinit callable name
    pub fn deinit_func(mut self, name: impl Into<String>) -> Self {
        self.config.deinit_func = Some(name.into());
        self
    }

    /// Append an auxiliary import
    pub fn import(mut self, module: impl Into<String>) -> Self {
        self.config.imports.push(module.into());
        self
    }

    /// Set the marshalling error policy
    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.config.on_error = on_error;
        self
    }

    /// Set the marshaller options
    pub fn template(mut self, template: TemplateOptions) -> Self {
        self.config.template = template;
        self
    }

    /// Build the config
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

/// Marshalling error policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum OnError {
    /// Drop the whole record
    #[default]
    DropMessage,
    /// Omit the offending field
    DropProperty,
    /// Replace the offending value with its JSON text
    FallbackToString,
    /// Like `drop-message`, without logging
    SilentlyDropMessage,
    /// Like `drop-property`, without logging
    SilentlyDropProperty,
    /// Like `fallback-to-string`, without logging
    SilentlyFallbackToString,
}

/// What to do with a value that cannot be marshalled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    DropMessage,
    DropProperty,
    FallbackToString,
}

impl OnError {
    /// The action regardless of verbosity
    pub fn action(&self) -> ErrorAction {
        match self {
            Self::DropMessage | Self::SilentlyDropMessage => ErrorAction::DropMessage,
            Self::DropProperty | Self::SilentlyDropProperty => ErrorAction::DropProperty,
            Self::FallbackToString | Self::SilentlyFallbackToString => {
                ErrorAction::FallbackToString
            }
        }
    }

    /// Whether a failed record is dropped without surfacing a failure
    pub fn drops_message(&self) -> bool {
        self.action() == ErrorAction::DropMessage
    }

    /// Whether absorbed errors are logged
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::SilentlyDropMessage | Self::SilentlyDropProperty | Self::SilentlyFallbackToString
        )
    }
}

/// Options forwarded opaquely to the value marshaller
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct TemplateOptions {
    /// Maximum nesting depth of a marshalled value
    #[serde(default = "default_max_depth")]
    #[validate(range(min = 1, max = 1024))]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    64
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Embedded runtime configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Directories searched for script modules, in order
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,

    /// Script file extension (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Operation budget per engine entry (unlimited when unset)
    #[serde(default)]
    pub max_operations: Option<u64>,

    /// Maximum function call nesting
    #[serde(default)]
    pub max_call_levels: Option<usize>,

    /// Maximum expression nesting depth
    #[serde(default)]
    pub max_expr_depth: Option<usize>,
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_extension() -> String {
    "rhai".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            extension: default_extension(),
            max_operations: None,
            max_call_levels: None,
            max_expr_depth: None,
        }
    }
}
