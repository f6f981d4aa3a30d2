//! Field normalization
//!
//! Turns one `(field name, value)` pair of a raw record into the
//! `(value_idx, fvalue)` entries stored in `AlyxRaw.Field`. Rules, first
//! match wins:
//! 1. `json`: re-serialized; dropped when too long
//! 2. `narrative`: emoji stripped
//! 3. null / empty / NaN: `"None"`
//! 4. list of objects or strings: one entry per element
//! 5. anything else: one entry, stringified

use std::sync::OnceLock;
use regex::Regex;
use super::pyfmt::{py_json_dumps, py_str};
use super::value::FieldValue;

pub const JSON_FIELD: &str = "json";
pub const NARRATIVE_FIELD: &str = "narrative";

/// Stored form of null-like values
pub const NONE_VALUE: &str = "None";

/// Default upper bound (exclusive, in characters) for serialized `json` values
pub const DEFAULT_JSON_MAX_LEN: usize = 10_000;

static EMOJI: OnceLock<Regex> = OnceLock::new();

fn emoji_pattern() -> &'static Regex {
    EMOJI.get_or_init(|| {
        Regex::new(concat!(
            "[",
            r"\x{1F600}-\x{1F64F}", // emoticons
            r"\x{1F300}-\x{1F5FF}", // symbols & pictographs
            r"\x{1F680}-\x{1F6FF}", // transport & map symbols
            r"\x{1F1E0}-\x{1F1FF}", // flags
            r"\x{2702}-\x{27B0}",
            r"\x{24C2}-\x{1F251}",
            "]+"
        ))
        .expect("static emoji pattern")
    })
}

/// Remove emoji, pictographs and flags from `text`
pub fn strip_emoji(text: &str) -> String {
    emoji_pattern().replace_all(text, "").into_owned()
}

/// One stored value of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub value_idx: u32,
    pub fvalue: String,
}

impl FieldEntry {
    fn single(fvalue: impl Into<String>) -> Self {
        Self {
            value_idx: 0,
            fvalue: fvalue.into(),
        }
    }
}

/// What a field turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Entries(Vec<FieldEntry>),
    /// A `json` value whose serialized form reached the length limit
    Oversized { len: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("narrative must be text, got {0}")]
    NarrativeNotText(&'static str),

    #[error("cannot serialize json value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Normalize one field of a raw record
pub fn normalize_field(name: &str, value: &FieldValue, json_max_len: usize) -> Result<FieldOutcome, NormalizeError> {
    if name == JSON_FIELD && !value.is_null() {
        let dumped = py_json_dumps(value)?;
        let len = dumped.chars().count();
        return Ok(if len < json_max_len {
            FieldOutcome::Entries(vec![FieldEntry::single(dumped)])
        } else {
            FieldOutcome::Oversized { len }
        });
    }

    if name == NARRATIVE_FIELD && !value.is_null() {
        let FieldValue::Text(text) = value else {
            return Err(NormalizeError::NarrativeNotText(value.type_name()));
        };
        return Ok(FieldOutcome::Entries(vec![FieldEntry::single(strip_emoji(text))]));
    }

    if value.is_empty_like() {
        return Ok(FieldOutcome::Entries(vec![FieldEntry::single(NONE_VALUE)]));
    }

    let entries = match value {
        FieldValue::List(items)
            if matches!(items.first(), Some(FieldValue::Json(_) | FieldValue::Text(_))) =>
        {
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| FieldEntry {
                    value_idx: idx as u32,
                    fvalue: py_str(item),
                })
                .collect()
        }
        other => vec![FieldEntry::single(py_str(other))],
    };
    Ok(FieldOutcome::Entries(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::value::Number;
    use serde_json::json;

    fn normalize(name: &str, value: serde_json::Value) -> FieldOutcome {
        normalize_field(name, &FieldValue::from(&value), DEFAULT_JSON_MAX_LEN).unwrap()
    }

    fn entries(pairs: &[(u32, &str)]) -> FieldOutcome {
        FieldOutcome::Entries(
            pairs
                .iter()
                .map(|(idx, v)| FieldEntry { value_idx: *idx, fvalue: v.to_string() })
                .collect(),
        )
    }

    #[test]
    fn test_json_field_is_reserialized() {
        assert_eq!(normalize("json", json!({"a": 1})), entries(&[(0, r#"{"a": 1}"#)]));
        assert_eq!(normalize("json", json!([1, 2])), entries(&[(0, "[1, 2]")]));
    }

    #[test]
    fn test_null_json_field_becomes_none() {
        assert_eq!(normalize("json", json!(null)), entries(&[(0, "None")]));
    }

    #[test]
    fn test_oversized_json_is_dropped() {
        let big = "x".repeat(DEFAULT_JSON_MAX_LEN);
        assert!(matches!(
            normalize("json", json!({ "blob": big })),
            FieldOutcome::Oversized { .. }
        ));

        // limit is exclusive: 9_999 characters pass
        let fits = "x".repeat(DEFAULT_JSON_MAX_LEN - 1 - r#""""#.len());
        assert!(matches!(normalize("json", json!(fits)), FieldOutcome::Entries(_)));
    }

    #[test]
    fn test_narrative_strips_emoji() {
        assert_eq!(
            normalize("narrative", json!("good session \u{1F600} mouse \u{1F42D} ok \u{1F1FA}\u{1F1F8}")),
            entries(&[(0, "good session  mouse  ok ")])
        );
        // empty narrative keeps its own rule
        assert_eq!(normalize("narrative", json!("")), entries(&[(0, "")]));
    }

    #[test]
    fn test_narrative_must_be_text() {
        let result = normalize_field("narrative", &FieldValue::Number(Number::Int(3)), DEFAULT_JSON_MAX_LEN);
        assert!(matches!(result, Err(NormalizeError::NarrativeNotText("number"))));
    }

    #[test]
    fn test_empty_values_become_none() {
        assert_eq!(normalize("x", json!(null)), entries(&[(0, "None")]));
        assert_eq!(normalize("x", json!("")), entries(&[(0, "None")]));
        assert_eq!(normalize("x", json!([])), entries(&[(0, "None")]));
        let nan = normalize_field("x", &FieldValue::Number(Number::Float(f64::NAN)), DEFAULT_JSON_MAX_LEN).unwrap();
        assert_eq!(nan, entries(&[(0, "None")]));
    }

    #[test]
    fn test_list_expansion() {
        assert_eq!(normalize("tags", json!(["a", "b"])), entries(&[(0, "a"), (1, "b")]));
        assert_eq!(
            normalize("water", json!([{"ml": 1.5}, {"ml": 2}])),
            entries(&[(0, "{'ml': 1.5}"), (1, "{'ml': 2}")])
        );
        // lists of numbers stay whole
        assert_eq!(normalize("coords", json!([1, 2.5])), entries(&[(0, "[1, 2.5]")]));
    }

    #[test]
    fn test_scalars_are_stringified() {
        assert_eq!(normalize("weight", json!(21.0)), entries(&[(0, "21.0")]));
        assert_eq!(normalize("alive", json!(true)), entries(&[(0, "True")]));
        assert_eq!(normalize("lab", json!("cortexlab")), entries(&[(0, "cortexlab")]));
        assert_eq!(normalize("meta", json!({"k": "v"})), entries(&[(0, "{'k': 'v'}")]));
    }
}
