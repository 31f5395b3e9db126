//! Structured records delivered by the host

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One structured event handed to the bridge for processing
///
/// A read-only string-keyed mapping whose values are scalars, arrays or
/// nested objects. The bridge never mutates or retains a record beyond the
/// `insert` call that receives it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record from a JSON value; `None` unless it is an object
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Iterate fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Convenience macro for building a record from a JSON object literal
///
/// # Example
/// ```rust
/// use rivven_script::record;
///
/// let r = record!({"host": "web-1", "severity": 3});
/// assert_eq!(r.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    ($data:tt) => {
        $crate::Record::from_json(serde_json::json!($data))
            .expect("record! requires a JSON object literal")
    };
}
