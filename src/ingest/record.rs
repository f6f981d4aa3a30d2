//! Raw records of an Alyx JSON export
//!
//! The export is a single JSON array of `{model, pk, fields}` objects as
//! written by Python's `json.dump`, which emits bare `NaN`, `Infinity` and
//! `-Infinity` for non-finite floats. Those tokens are not JSON, so before
//! parsing each one is swapped for a marker string that is turned back into
//! the float when the record's fields are converted.

use std::borrow::Cow;
use std::path::Path;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use super::value::FieldValue;
use crate::Result;

const NON_FINITE_TOKENS: [(&str, f64); 3] = [
    ("NaN", f64::NAN),
    ("-Infinity", f64::NEG_INFINITY),
    ("Infinity", f64::INFINITY),
];

/// One record of the export
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub model: String,
    /// Primary key; a UUID string for the models migrated here
    pub pk: Value,
    /// Field values in export order
    pub fields: Vec<(String, FieldValue)>,
}

impl RawRecord {
    /// Parse the primary key as a UUID
    pub fn uuid(&self) -> std::result::Result<Uuid, String> {
        match &self.pk {
            Value::String(s) => Uuid::parse_str(s).map_err(|e| e.to_string()),
            other => Err(format!("pk is not a string: {}", other)),
        }
    }
}

#[derive(Deserialize)]
struct RecordJson {
    model: String,
    #[serde(default)]
    pk: Value,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Read every record of an export file
pub fn load_records(path: &Path) -> Result<Vec<RawRecord>> {
    let text = std::fs::read_to_string(path)?;
    parse_records(&text)
}

/// Parse an export held in memory
pub fn parse_records(text: &str) -> Result<Vec<RawRecord>> {
    let mut nonce = 0;
    loop {
        let marker = NonFiniteMarker::new(nonce);
        let (marked, replaced) = marker.mark(text);
        let tree: Value = serde_json::from_str(&marked)?;

        // a string of the input that happens to carry the marker prefix
        // would be miscounted; retry with another prefix
        if replaced > 0 && marker.count_in(&tree) != replaced {
            nonce += 1;
            continue;
        }

        let raw: Vec<RecordJson> = serde_json::from_value(tree)?;
        let active = (replaced > 0).then_some(&marker);
        return Ok(raw.into_iter().map(|r| r.into_record(active)).collect());
    }
}

impl RecordJson {
    fn into_record(self, marker: Option<&NonFiniteMarker>) -> RawRecord {
        let non_finite = |s: &str| marker.and_then(|m| m.value_of(s));
        let pk_is_marker = matches!(&self.pk, Value::String(s) if non_finite(s).is_some());
        let pk = if pk_is_marker { Value::Null } else { self.pk };
        RawRecord {
            model: self.model,
            pk,
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), FieldValue::from_json_with(value, &non_finite)))
                .collect(),
        }
    }
}

/// Stand-in strings for non-finite float tokens
struct NonFiniteMarker {
    prefix: String,
}

impl NonFiniteMarker {
    fn new(nonce: u32) -> Self {
        Self {
            prefix: format!("__alyxraw_non_finite_{}__", nonce),
        }
    }

    fn value_of(&self, s: &str) -> Option<f64> {
        let token = s.strip_prefix(&self.prefix)?;
        NON_FINITE_TOKENS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, value)| *value)
    }

    /// Replace non-finite tokens outside string literals with marker strings
    fn mark<'t>(&self, text: &'t str) -> (Cow<'t, str>, usize) {
        if !text.contains("NaN") && !text.contains("Infinity") {
            return (Cow::Borrowed(text), 0);
        }

        let mut out = String::with_capacity(text.len());
        let mut replaced = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut rest = text;

        'scan: while let Some(c) = rest.chars().next() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else if c == '"' {
                in_string = true;
            } else {
                for (token, _) in NON_FINITE_TOKENS {
                    if let Some(after) = rest.strip_prefix(token) {
                        out.push('"');
                        out.push_str(&self.prefix);
                        out.push_str(token);
                        out.push('"');
                        replaced += 1;
                        rest = after;
                        continue 'scan;
                    }
                }
            }
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
        (Cow::Owned(out), replaced)
    }

    /// Strings (keys included) carrying this marker's prefix
    fn count_in(&self, value: &Value) -> usize {
        match value {
            Value::String(s) => usize::from(s.starts_with(&self.prefix)),
            Value::Array(items) => items.iter().map(|v| self.count_in(v)).sum(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| usize::from(k.starts_with(&self.prefix)) + self.count_in(v))
                .sum(),
            _ => 0,
        }
    }
}
