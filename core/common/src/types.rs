//! Common types used throughout crmsync.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered property map sent to the destination.
///
/// Insertion order is preserved, so static mappings keep their configured
/// order and dynamic attributes follow them.
pub type PropertyMap = serde_json::Map<String, Value>;

/// Source-assigned record identifier, stable within an object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new RecordId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::Validation(
                "RecordId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Build an id from a JSON value. Sources use both numeric and string ids.
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        match value {
            Value::String(s) => Self::new(s.clone()),
            Value::Number(n) => Self::new(n.to_string()),
            other => Err(crate::Error::Validation(format!(
                "Record id must be a string or number, got {}",
                other
            ))),
        }
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record read from the source system.
///
/// The payload is kept as raw JSON and addressed by dot paths; the system
/// never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Source-assigned identifier.
    pub id: RecordId,
    /// Full record payload, including the id field.
    pub data: Value,
}

impl SourceRecord {
    /// Create a record from an id and payload.
    pub fn new(id: RecordId, data: Value) -> Self {
        Self { id, data }
    }

    /// Build a record from a JSON object carrying an `id` field.
    ///
    /// # Errors
    /// - Payload is not an object
    /// - `id` is missing, empty or not a scalar
    pub fn from_value(data: Value) -> crate::Result<Self> {
        let id = match data.get("id") {
            Some(id) => RecordId::from_value(id)?,
            None if data.is_object() => {
                return Err(crate::Error::Validation(
                    "Source record has no id field".to_string(),
                ));
            }
            None => {
                return Err(crate::Error::Validation(
                    "Source record is not a JSON object".to_string(),
                ));
            }
        };
        Ok(Self { id, data })
    }
}

/// A dynamic (key, value) pair attached to a source record.
///
/// Keys are chosen by the source system and are used verbatim as
/// destination property names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    /// Attribute key.
    pub key: String,
    /// Attribute value; structured values are serialized during normalization.
    pub value: Value,
}

impl AttributeEntry {
    /// Create a new attribute entry.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
