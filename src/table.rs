//! Table handle - schema-qualified identity for every table
//!
//! Format: `` `<schema>`.`<table>` ``
//!
//! Examples:
//! - `` `ibl_alyxraw`.`alyx_raw` ``
//! - `` `ibl_alyxraw`.`alyx_raw__field` `` (part table of `AlyxRaw`)

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

static FULL_NAME: OnceLock<Regex> = OnceLock::new();

fn full_name_pattern() -> &'static Regex {
    FULL_NAME.get_or_init(|| {
        Regex::new(r"^`([^`]+)`\.`([^`]+)`$").expect("static table name pattern")
    })
}

/// Tier prefixes of table names: job/log tables, lookup, computed, imported.
const TIER_PREFIXES: &[&str] = &["~", "#", "__", "_"];

/// Reference to a table inside a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableHandle {
    /// Schema (attached database) name
    pub schema: String,
    /// Table name inside the schema
    pub table: String,
}

impl TableHandle {
    /// Create a new table handle
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse a fully-qualified name of the form `` `schema`.`table` ``
    pub fn parse_full_name(name: &str) -> Result<Self> {
        let caps = full_name_pattern()
            .captures(name)
            .ok_or_else(|| Error::MalformedTableName(name.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }

    /// Fully-qualified name, the node key of the dependency graph
    pub fn full_name(&self) -> String {
        format!("`{}`.`{}`", self.schema, self.table)
    }

    /// Class name of the table, e.g. `alyx_raw__field` -> `AlyxRaw.Field`
    pub fn class_name(&self) -> String {
        let mut name = self.table.as_str();
        for prefix in TIER_PREFIXES {
            if let Some(rest) = name.strip_prefix(prefix) {
                name = rest;
                break;
            }
        }
        name.split("__")
            .map(to_camel_case)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Whether this is a part table (`master__part`)
    pub fn is_part(&self) -> bool {
        self.master().is_some()
    }

    /// Master table of a part table
    pub fn master(&self) -> Option<TableHandle> {
        let name = self.table.trim_start_matches(['~', '#', '_']);
        let offset = self.table.len() - name.len();
        name.find("__")
            .map(|idx| TableHandle::new(&self.schema, &self.table[..offset + idx]))
    }
}

/// `alyx_raw` -> `AlyxRaw`
fn to_camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = true;
    for c in snake.chars() {
        if c == '_' || !c.is_alphanumeric() {
            upper = true;
            continue;
        }
        if upper && c.is_ascii_alphabetic() {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper = false;
    }
    out
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

impl FromStr for TableHandle {
    type Err = Error;

    /// Accepts both `` `schema`.`table` `` and the unquoted `schema.table`.
    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with('`') {
            return Self::parse_full_name(s);
        }
        match s.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                Ok(Self::new(schema, table))
            }
            _ => Err(Error::MalformedTableName(s.to_string())),
        }
    }
}

impl Serialize for TableHandle {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.full_name())
    }
}

impl<'de> Deserialize<'de> for TableHandle {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TableHandle::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_roundtrip() {
        let handle = TableHandle::new("ibl_alyxraw", "alyx_raw");
        assert_eq!(handle.full_name(), "`ibl_alyxraw`.`alyx_raw`");
        assert_eq!(TableHandle::parse_full_name(&handle.full_name()).unwrap(), handle);
    }

    #[test]
    fn test_unquoted_form() {
        let handle: TableHandle = "ibl_subject.subject".parse().unwrap();
        assert_eq!(handle.schema, "ibl_subject");
        assert_eq!(handle.table, "subject");
    }

    #[test]
    fn test_malformed_names() {
        assert!(TableHandle::parse_full_name("alyx_raw").is_err());
        assert!(TableHandle::parse_full_name("`ibl`.alyx_raw").is_err());
        assert!("no_dot".parse::<TableHandle>().is_err());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(TableHandle::new("s", "alyx_raw").class_name(), "AlyxRaw");
        assert_eq!(TableHandle::new("s", "alyx_raw__field").class_name(), "AlyxRaw.Field");
        assert_eq!(TableHandle::new("s", "#lab_location").class_name(), "LabLocation");
        assert_eq!(TableHandle::new("s", "_probe_trajectory").class_name(), "ProbeTrajectory");
        assert_eq!(TableHandle::new("s", "__channel_group").class_name(), "ChannelGroup");
        assert_eq!(TableHandle::new("s", "~log").class_name(), "Log");
    }

    #[test]
    fn test_master_of_part() {
        let part = TableHandle::new("s", "_probe__channel");
        assert!(part.is_part());
        assert_eq!(part.master().unwrap(), TableHandle::new("s", "_probe"));
        assert!(!TableHandle::new("s", "__computed").is_part());
    }
}
