use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Generic runtime value carried in message payloads, attributes, and
/// event variables.
///
/// Supports all JSON-compatible types plus binary data. Maps use `BTreeMap`
/// so that aggregated payloads serialize in a deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// JSON null.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// Binary data (not directly representable in JSON).
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Ordered map of string keys to values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the string slice if this is a `Value::String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is a `Value::Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the elements if this is a `Value::Array`.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries if this is a `Value::Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

/// Lossless except for `serde_json` numbers outside the `i64`/`f64` range,
/// which become `Value::Null`.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// The payload-bearing part of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message body.
    pub payload: Value,
    /// Transport or connector attributes describing the payload.
    pub attributes: BTreeMap<String, Value>,
}

impl Message {
    /// Creates a message with the given payload and no attributes.
    #[must_use]
    pub fn of(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute, replacing any previous value under `key`.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_conversion_preserves_structure() {
        let json = serde_json::json!({
            "name": "order",
            "lines": [1, 2.5, null],
            "paid": true,
        });

        let value = Value::from(json);
        let map = value.as_map().unwrap();
        assert_eq!(map["name"].as_str(), Some("order"));
        assert_eq!(map["paid"], Value::Bool(true));

        let lines = map["lines"].as_array().unwrap();
        assert_eq!(lines[0], Value::Int(1));
        assert_eq!(lines[1], Value::Float(2.5));
        assert!(lines[2].is_null());
    }

    #[test]
    fn message_of_sets_payload_only() {
        let msg = Message::of(7).with_attribute("content-type", "text/plain");
        assert_eq!(msg.payload.as_int(), Some(7));
        assert_eq!(msg.attributes.len(), 1);
        assert_eq!(msg.attributes["content-type"].as_str(), Some("text/plain"));
    }

    #[test]
    fn serde_roundtrip_of_nested_value() {
        let mut inner = BTreeMap::new();
        inner.insert("k".to_string(), Value::Bytes(vec![1, 2, 3]));
        let value = Value::Array(vec![Value::Map(inner), Value::Null]);

        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
