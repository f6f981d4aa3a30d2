//! Field values of raw records
//!
//! Export values are loosely typed; they are read into the closed
//! [`FieldValue`] variant set before normalization.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Numeric field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Number {
    pub fn is_nan(&self) -> bool {
        matches!(self, Number::Float(f) if f.is_nan())
    }
}

/// A single field value of a raw record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    List(Vec<FieldValue>),
    /// JSON object, entries in export order
    Json(Vec<(String, FieldValue)>),
}

impl FieldValue {
    /// Null, empty string, empty list or NaN
    pub fn is_empty_like(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Variant name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
            FieldValue::List(_) => "list",
            FieldValue::Json(_) => "object",
        }
    }
}

impl FieldValue {
    /// Convert a parsed JSON value; `non_finite` maps strings standing in for
    /// `NaN` and `Infinity` tokens back to their float value
    pub fn from_json_with<F>(value: &Value, non_finite: &F) -> Self
    where
        F: Fn(&str) -> Option<f64>,
    {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => {
                let number = if let Some(i) = n.as_i64() {
                    Number::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Number::UInt(u)
                } else {
                    Number::Float(n.as_f64().unwrap_or(f64::NAN))
                };
                FieldValue::Number(number)
            }
            Value::String(s) => match non_finite(s) {
                Some(f) => FieldValue::Number(Number::Float(f)),
                None => FieldValue::Text(s.clone()),
            },
            Value::Array(items) => FieldValue::List(
                items.iter().map(|v| FieldValue::from_json_with(v, non_finite)).collect(),
            ),
            Value::Object(map) => FieldValue::Json(
                map.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json_with(v, non_finite)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        FieldValue::from_json_with(value, &|_: &str| None)
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Number(Number::Int(i)) => serializer.serialize_i64(*i),
            FieldValue::Number(Number::UInt(u)) => serializer.serialize_u64(*u),
            FieldValue::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Json(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}
