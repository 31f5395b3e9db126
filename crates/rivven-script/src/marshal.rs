//! Record → runtime value marshalling
//!
//! The marshaller turns a [`Record`] into the runtime's native map type. It
//! always runs with the runtime handle held, since building `Dynamic`
//! values is interaction with the runtime.
//!
//! Field-level failures are resolved by the configured [`OnError`] policy:
//!
//! | policy | effect on the failing field |
//! |---|---|
//! | `drop-message` | the whole record fails |
//! | `drop-property` | the field is omitted |
//! | `fallback-to-string` | the field becomes its compact JSON text |

use crate::config::{ErrorAction, OnError, TemplateOptions};
use crate::record::Record;
use rhai::{Array, Dynamic, Map};
use serde_json::{Number, Value};
use thiserror::Error;
use tracing::warn;

/// Errors raised while marshalling a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// A value is nested deeper than `max_depth`
    #[error("value at '{path}' exceeds maximum nesting depth {max_depth}")]
    DepthExceeded { path: String, max_depth: usize },

    /// The record cannot be represented
    #[error("cannot marshal record: {0}")]
    Unsupported(String),
}

/// Per-record marshalling context
#[derive(Debug, Clone, Copy)]
pub struct MarshalContext<'a> {
    /// Driver identity, for log events
    pub driver: &'a str,
    /// 1-based sequence number of the record within this bridge
    pub seq_num: u64,
    /// Error policy
    pub on_error: OnError,
    /// Pass-through options
    pub options: &'a TemplateOptions,
}

/// Converts records into runtime values
///
/// Implementations are shared by all worker threads of a bridge and are
/// only ever called while the runtime handle is held.
pub trait ValueMarshaller: Send + Sync {
    /// Convert one record into a runtime mapping value
    fn marshal(&self, record: &Record, ctx: &MarshalContext<'_>) -> Result<Dynamic, MarshalError>;
}

/// Default marshaller: JSON object → Rhai object map
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl JsonMarshaller {
    /// Create a new marshaller
    pub fn new() -> Self {
        Self
    }

    fn convert(
        &self,
        value: &Value,
        level: usize,
        path: &str,
        ctx: &MarshalContext<'_>,
    ) -> Result<Dynamic, MarshalError> {
        match value {
            Value::Null => Ok(Dynamic::UNIT),
            Value::Bool(b) => Ok(Dynamic::from(*b)),
            Value::Number(n) => Ok(number_to_dynamic(n)),
            Value::String(s) => Ok(Dynamic::from(s.clone())),
            Value::Array(items) => {
                check_depth(items.is_empty(), level, path, ctx)?;
                let mut array = Array::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let child = format!("{}[{}]", path, i);
                    if let Some(v) = self.convert_field(item, level + 1, &child, ctx)? {
                        array.push(v);
                    }
                }
                Ok(Dynamic::from_array(array))
            }
            Value::Object(fields) => {
                check_depth(fields.is_empty(), level, path, ctx)?;
                let mut map = Map::new();
                for (key, item) in fields {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    if let Some(v) = self.convert_field(item, level + 1, &child, ctx)? {
                        map.insert(key.as_str().into(), v);
                    }
                }
                Ok(Dynamic::from_map(map))
            }
        }
    }

    /// Convert a field, applying the error policy to a failure
    fn convert_field(
        &self,
        value: &Value,
        level: usize,
        path: &str,
        ctx: &MarshalContext<'_>,
    ) -> Result<Option<Dynamic>, MarshalError> {
        let err = match self.convert(value, level, path, ctx) {
            Ok(v) => return Ok(Some(v)),
            Err(err) => err,
        };

        match ctx.on_error.action() {
            ErrorAction::DropMessage => Err(err),
            ErrorAction::DropProperty => {
                if !ctx.on_error.is_silent() {
                    warn!(
                        driver = %ctx.driver,
                        seq_num = ctx.seq_num,
                        error = %err,
                        "Dropping property that cannot be marshalled"
                    );
                }
                Ok(None)
            }
            ErrorAction::FallbackToString => {
                if !ctx.on_error.is_silent() {
                    warn!(
                        driver = %ctx.driver,
                        seq_num = ctx.seq_num,
                        error = %err,
                        "Falling back to string for property that cannot be marshalled"
                    );
                }
                Ok(Some(Dynamic::from(value.to_string())))
            }
        }
    }
}

impl ValueMarshaller for JsonMarshaller {
    fn marshal(&self, record: &Record, ctx: &MarshalContext<'_>) -> Result<Dynamic, MarshalError> {
        let mut map = Map::new();
        for (key, value) in record.iter() {
            if let Some(v) = self.convert_field(value, 1, key, ctx)? {
                map.insert(key.as_str().into(), v);
            }
        }
        Ok(Dynamic::from_map(map))
    }
}

/// A non-empty container at `level` puts its elements at `level + 1`
fn check_depth(
    empty: bool,
    level: usize,
    path: &str,
    ctx: &MarshalContext<'_>,
) -> Result<(), MarshalError> {
    if !empty && level >= ctx.options.max_depth {
        return Err(MarshalError::DepthExceeded {
            path: path.to_string(),
            max_depth: ctx.options.max_depth,
        });
    }
    Ok(())
}

fn number_to_dynamic(n: &Number) -> Dynamic {
    match n.as_i64() {
        Some(i) => Dynamic::from(i),
        None => n.as_f64().map_or(Dynamic::UNIT, Dynamic::from),
    }
}
