//! Binding registry for table lookups
//!
//! A [`BindingContext`] maps module names to the schema tables they expose.
//! Package modules are registered up front by the caller; virtual modules are
//! materialized from the store on demand, one per schema, and registered
//! under the schema's own name.

use std::collections::{BTreeMap, BTreeSet};
use crate::Result;
use crate::storage::SqliteStore;
use crate::storage::schema::{ALYX_RAW, ALYX_RAW_FIELD};
use crate::table::TableHandle;

/// How a module came to be bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Declared by the caller
    Package,
    /// Created from the store for a schema nobody declared
    Virtual,
}

/// A named set of tables belonging to one schema
#[derive(Debug, Clone)]
pub struct SchemaModule {
    pub name: String,
    pub schema: String,
    pub kind: ModuleKind,
    tables: BTreeSet<String>,
}

impl SchemaModule {
    /// A package module exposing the given tables of `schema`
    pub fn package<I, S>(name: impl Into<String>, schema: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            schema: schema.into(),
            kind: ModuleKind::Package,
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    /// A virtual module exposing every table the store holds for `schema`
    pub fn create_virtual(store: &SqliteStore, schema: &str) -> Result<Self> {
        let tables = store.list_tables(schema)?;
        tracing::debug!("Creating virtual module {} ({} tables)", schema, tables.len());
        Ok(Self {
            name: schema.to_string(),
            schema: schema.to_string(),
            kind: ModuleKind::Virtual,
            tables: tables.into_iter().collect(),
        })
    }

    /// Check whether the module binds a table
    pub fn contains(&self, table: &TableHandle) -> bool {
        self.schema == table.schema && self.tables.contains(&table.table)
    }

    /// Number of tables bound by this module
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// The package module binding the raw tables inside `schema`
pub fn alyxraw_module(schema: &str) -> SchemaModule {
    SchemaModule::package("alyxraw", schema, [ALYX_RAW, ALYX_RAW_FIELD])
}

/// Result of a successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub class_name: String,
    pub kind: ModuleKind,
    pub table: TableHandle,
}

/// Registry of modules, keyed by module name
#[derive(Debug, Default)]
pub struct BindingContext {
    modules: BTreeMap<String, SchemaModule>,
}

impl BindingContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with_module(mut self, module: SchemaModule) -> Self {
        self.register(module);
        self
    }

    /// Register a module under its own name, replacing any previous binding
    pub fn register(&mut self, module: SchemaModule) {
        self.modules.insert(module.name.clone(), module);
    }

    /// Get a module by name
    pub fn module(&self, name: &str) -> Option<&SchemaModule> {
        self.modules.get(name)
    }

    /// All registered modules, sorted by name
    pub fn modules(&self) -> impl Iterator<Item = &SchemaModule> {
        self.modules.values()
    }

    /// Number of virtual modules registered so far
    pub fn virtual_count(&self) -> usize {
        self.modules.values().filter(|m| m.kind == ModuleKind::Virtual).count()
    }

    /// Resolve a fully-qualified table name to its bound class path,
    /// e.g. `` `ibl_alyxraw`.`alyx_raw__field` `` -> `alyxraw.AlyxRaw.Field`.
    ///
    /// Package bindings take precedence over virtual ones.
    pub fn lookup_class_name(&self, full_name: &str) -> Option<Binding> {
        let table = TableHandle::parse_full_name(full_name).ok()?;
        let mut candidates: Vec<&SchemaModule> =
            self.modules.values().filter(|m| m.contains(&table)).collect();
        candidates.sort_by_key(|m| m.kind == ModuleKind::Virtual);

        candidates.first().map(|m| Binding {
            class_name: format!("{}.{}", m.name, table.class_name()),
            kind: m.kind,
            table,
        })
    }

    /// The virtual module of `schema`, creating and registering it on first use
    pub fn ensure_virtual(&mut self, store: &SqliteStore, schema: &str) -> Result<&SchemaModule> {
        let existing = self
            .modules
            .get(schema)
            .is_some_and(|m| m.kind == ModuleKind::Virtual && m.schema == schema);
        if !existing {
            let module = SchemaModule::create_virtual(store, schema)?;
            self.register(module);
        }
        Ok(&self.modules[schema])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_package_binding() {
        let ctx = BindingContext::new().with_module(alyxraw_module("ibl_alyxraw"));
        let binding = ctx
            .lookup_class_name("`ibl_alyxraw`.`alyx_raw__field`")
            .unwrap();
        assert_eq!(binding.class_name, "alyxraw.AlyxRaw.Field");
        assert_eq!(binding.kind, ModuleKind::Package);
        assert_eq!(binding.table, TableHandle::new("ibl_alyxraw", "alyx_raw__field"));

        assert!(ctx.lookup_class_name("`ibl_alyxraw`.`other`").is_none());
        assert!(ctx.lookup_class_name("`ibl_subject`.`alyx_raw`").is_none());
        assert!(ctx.lookup_class_name("3").is_none());
    }

    #[test]
    fn test_virtual_module_created_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema("ibl_subject", None).unwrap();
        store.execute_batch("CREATE TABLE ibl_subject.subject (id INTEGER PRIMARY KEY);").unwrap();

        let mut ctx = BindingContext::new();
        ctx.ensure_virtual(&store, "ibl_subject").unwrap();
        // tables declared afterwards are not picked up by the existing binding
        store.execute_batch("CREATE TABLE ibl_subject.death (id INTEGER PRIMARY KEY);").unwrap();
        let module = ctx.ensure_virtual(&store, "ibl_subject").unwrap();

        assert_eq!(module.len(), 1);
        assert_eq!(ctx.virtual_count(), 1);
        let binding = ctx.lookup_class_name("`ibl_subject`.`subject`").unwrap();
        assert_eq!(binding.class_name, "ibl_subject.Subject");
        assert_eq!(binding.kind, ModuleKind::Virtual);
    }
}
