//! Dependent table resolution
//!
//! Walks the dependency graph downstream of a table and turns every
//! descendant into a bound table handle:
//! 1. Integer alias nodes are skipped
//! 2. Names already bound in the context are labeled `package`
//! 3. Anything else gets a virtual module for its schema, labeled `virtual`;
//!    later tables of that schema are then bound and labeled `package`

pub mod binding;

use std::sync::OnceLock;
use regex::Regex;
use serde::Serialize;
use crate::{Error, Result};
use crate::graph::DependencyGraph;
use crate::storage::SqliteStore;
use crate::table::TableHandle;

pub use binding::{alyxraw_module, Binding, BindingContext, ModuleKind, SchemaModule};

static SCHEMA_PREFIX: OnceLock<Regex> = OnceLock::new();

/// Schema part of a qualified name: text between the leading backtick and `` `. ``
fn schema_of(full_name: &str) -> Result<String> {
    let pattern = SCHEMA_PREFIX.get_or_init(|| Regex::new(r"^`(.*)`\.").expect("static schema pattern"));
    pattern
        .captures(full_name)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| Error::MalformedTableName(full_name.to_string()))
}

/// How a dependent table was bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableLabel {
    Package,
    Virtual,
}

impl TableLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableLabel::Package => "package",
            TableLabel::Virtual => "virtual",
        }
    }
}

impl std::fmt::Display for TableLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dependent table together with the binding that resolved it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTable {
    pub label: TableLabel,
    /// Bound class path, e.g. `alyxraw.AlyxRaw.Field`
    pub class_name: String,
    pub table: TableHandle,
}

impl ResolvedTable {
    fn new(label: TableLabel, binding: Binding) -> Self {
        Self {
            label,
            class_name: binding.class_name,
            table: binding.table,
        }
    }
}

/// Tables downstream of a root table
pub struct DependentTables<'a> {
    store: &'a SqliteStore,
    root: TableHandle,
    graph: DependencyGraph,
    descendants: Vec<String>,
}

impl<'a> DependentTables<'a> {
    /// Load the dependency graph and compute the descendants of `root`
    pub fn new(store: &'a SqliteStore, root: TableHandle) -> Result<Self> {
        let graph = DependencyGraph::load(store)?;
        let descendants = graph.descendants(&root.full_name())?;
        tracing::debug!("{} has {} descendant nodes", root, descendants.len());
        Ok(Self {
            store,
            root,
            graph,
            descendants,
        })
    }

    /// The root table
    pub fn root(&self) -> &TableHandle {
        &self.root
    }

    /// The loaded dependency graph
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Descendant node names, root first, topologically sorted
    pub fn descendants(&self) -> &[String] {
        &self.descendants
    }

    /// Resolve every descendant against `ctx`, creating virtual modules for
    /// unbound schemas. With `virtual_only`, only virtual entries are kept.
    pub fn table_list(&self, ctx: &mut BindingContext, virtual_only: bool) -> Result<Vec<ResolvedTable>> {
        let mut tables = Vec::new();

        for name in &self.descendants {
            if name.parse::<i64>().is_ok() {
                continue;
            }

            let resolved = match ctx.lookup_class_name(name) {
                Some(binding) => ResolvedTable::new(TableLabel::Package, binding),
                None => {
                    let schema = schema_of(name)?;
                    ctx.ensure_virtual(self.store, &schema)?;
                    let binding = ctx
                        .lookup_class_name(name)
                        .ok_or_else(|| Error::TableNotFound(name.clone()))?;
                    ResolvedTable::new(TableLabel::Virtual, binding)
                }
            };
            tables.push(resolved);
        }

        if virtual_only {
            tables.retain(|t| t.label == TableLabel::Virtual);
        }
        Ok(tables)
    }

    /// Handles of the descendants that needed a virtual module
    pub fn virtual_tables(&self, ctx: &mut BindingContext) -> Result<Vec<TableHandle>> {
        Ok(self
            .table_list(ctx, true)?
            .into_iter()
            .map(|t| t.table)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// raw schema declared by the package; `ibl_alyxraw.ingest_log` and the
    /// whole `ibl_ephys` schema are unknown to it
    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema("ibl_alyxraw", None).unwrap();
        store.attach_schema("ibl_ephys", None).unwrap();
        store.declare_alyxraw("ibl_alyxraw").unwrap();
        store
            .execute_batch(
                "CREATE TABLE ibl_alyxraw.ingest_log (
                     raw_uuid BLOB NOT NULL REFERENCES alyx_raw(uuid),
                     logged_at TEXT NOT NULL,
                     PRIMARY KEY (raw_uuid, logged_at));
                 CREATE TABLE ibl_ephys.probe (probe_uuid BLOB PRIMARY KEY);
                 CREATE TABLE ibl_ephys._probe__channel (
                     probe_uuid BLOB NOT NULL REFERENCES _probe(probe_uuid),
                     channel_idx INTEGER NOT NULL,
                     PRIMARY KEY (probe_uuid, channel_idx));
                 CREATE TABLE ibl_ephys._probe (probe_uuid BLOB PRIMARY KEY REFERENCES probe(probe_uuid));",
            )
            .unwrap();
        store
    }

    fn raw_root() -> TableHandle {
        TableHandle::new("ibl_alyxraw", "alyx_raw")
    }

    #[test]
    fn test_package_and_virtual_labels() {
        let store = store();
        let mut ctx = BindingContext::new().with_module(alyxraw_module("ibl_alyxraw"));
        let deps = DependentTables::new(&store, raw_root()).unwrap();

        let tables = deps.table_list(&mut ctx, false).unwrap();
        assert_eq!(tables[0].table, raw_root());
        assert_eq!(tables[0].label, TableLabel::Package);

        let field = tables.iter().find(|t| t.table.table == "alyx_raw__field").unwrap();
        assert_eq!(field.label, TableLabel::Package);
        assert_eq!(field.class_name, "alyxraw.AlyxRaw.Field");

        let log = tables.iter().find(|t| t.table.table == "ingest_log").unwrap();
        assert_eq!(log.label, TableLabel::Virtual);
        assert_eq!(log.class_name, "ibl_alyxraw.IngestLog");
        assert_eq!(tables.len(), 3);
    }

    #[test]
    fn test_alias_nodes_excluded() {
        let store = store();
        let mut ctx = BindingContext::new();
        let deps = DependentTables::new(&store, raw_root()).unwrap();

        // ingest_log renames uuid -> raw_uuid, so the graph holds an alias node
        assert!(deps.descendants().iter().any(|n| n.parse::<i64>().is_ok()));
        let tables = deps.table_list(&mut ctx, false).unwrap();
        assert!(tables.iter().all(|t| t.table.full_name().starts_with('`')));
        assert_eq!(tables.len(), 3);
    }

    #[test]
    fn test_one_virtual_module_per_schema() {
        let store = store();
        let mut ctx = BindingContext::new();
        let deps = DependentTables::new(&store, TableHandle::new("ibl_ephys", "probe")).unwrap();

        let tables = deps.table_list(&mut ctx, false).unwrap();
        let labels: Vec<(&str, TableLabel)> = tables.iter().map(|t| (t.table.table.as_str(), t.label)).collect();
        assert_eq!(
            labels,
            vec![
                ("probe", TableLabel::Virtual),
                ("_probe", TableLabel::Package),
                ("_probe__channel", TableLabel::Package),
            ]
        );
        assert_eq!(ctx.virtual_count(), 1);
        assert_eq!(ctx.module("ibl_ephys").unwrap().len(), 3);

        let part = tables.iter().find(|t| t.table.table == "_probe__channel").unwrap();
        assert_eq!(part.class_name, "ibl_ephys.Probe.Channel");

        // second pass finds every table already bound
        let again = deps.table_list(&mut ctx, false).unwrap();
        assert!(again.iter().all(|t| t.label == TableLabel::Package));
        assert_eq!(ctx.virtual_count(), 1);
    }

    #[test]
    fn test_virtual_only_is_subset() {
        let store = store();
        let deps = DependentTables::new(&store, raw_root()).unwrap();

        let mut ctx = BindingContext::new().with_module(alyxraw_module("ibl_alyxraw"));
        let all = deps.table_list(&mut ctx, false).unwrap();

        let mut fresh = BindingContext::new().with_module(alyxraw_module("ibl_alyxraw"));
        let virtual_only = deps.table_list(&mut fresh, true).unwrap();

        assert_eq!(virtual_only.len(), 1);
        assert!(virtual_only.iter().all(|t| t.label == TableLabel::Virtual));
        assert!(virtual_only.iter().all(|t| all.contains(t)));

        let mut handles_ctx = BindingContext::new().with_module(alyxraw_module("ibl_alyxraw"));
        let handles = deps.virtual_tables(&mut handles_ctx).unwrap();
        assert_eq!(handles, vec![TableHandle::new("ibl_alyxraw", "ingest_log")]);

        // only the table that created the ibl_ephys module counts as virtual
        let ephys = DependentTables::new(&store, TableHandle::new("ibl_ephys", "probe")).unwrap();
        let handles = ephys.virtual_tables(&mut BindingContext::new()).unwrap();
        assert_eq!(handles, vec![TableHandle::new("ibl_ephys", "probe")]);
    }

    #[test]
    fn test_schema_extraction() {
        assert_eq!(schema_of("`ibl_ephys`.`probe`").unwrap(), "ibl_ephys");
        assert!(matches!(schema_of("probe"), Err(Error::MalformedTableName(_))));
    }

    #[test]
    fn test_unknown_root() {
        let store = store();
        let result = DependentTables::new(&store, TableHandle::new("ibl_alyxraw", "missing"));
        assert!(matches!(result, Err(Error::TableNotFound(_))));
    }
}
