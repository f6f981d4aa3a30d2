//! Cascading delete
//!
//! Deleting rows of a table also deletes every row downstream of them. The
//! rows to remove in each dependent table are described by nesting the
//! parent's condition through the foreign key:
//!
//! `(child_cols) IN (SELECT parent_cols FROM parent WHERE <parent condition>)`
//!
//! Tables are emptied children first, all inside one transaction.

use std::collections::HashMap;
use rusqlite::types::Value;
use serde::Serialize;
use crate::{Error, Result};
use crate::dependents::{alyxraw_module, BindingContext, DependentTables, ResolvedTable};
use crate::storage::schema::{quote_ident, ALYX_RAW};
use crate::storage::SqliteStore;
use crate::table::TableHandle;

/// Options for destructive operations
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Ask for confirmation before deleting anything
    pub safemode: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self { safemode: true }
    }
}

/// SQL condition with positional parameters `?1..?n`
#[derive(Debug, Clone)]
pub struct Restriction {
    pub condition: String,
    pub params: Vec<Value>,
}

impl Restriction {
    /// `column = value`
    pub fn attribute_eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            condition: format!("{} = ?1", quote_ident(column)),
            params: vec![value.into()],
        }
    }
}

/// Rows that a delete would remove from one table
#[derive(Debug, Clone, Serialize)]
pub struct PlannedDelete {
    pub table: ResolvedTable,
    pub rows: usize,
    #[serde(skip)]
    condition: String,
}

/// Everything a delete would remove, in topological order
#[derive(Debug, Clone, Serialize)]
pub struct DeletePlan {
    pub root: TableHandle,
    pub entries: Vec<PlannedDelete>,
    #[serde(skip)]
    params: Vec<Value>,
}

impl DeletePlan {
    /// Total number of rows across all tables
    pub fn total_rows(&self) -> usize {
        self.entries.iter().map(|e| e.rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }
}

/// Rows removed per table
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<(TableHandle, usize)>,
}

impl DeleteReport {
    pub fn total_rows(&self) -> usize {
        self.deleted.iter().map(|(_, n)| n).sum()
    }
}

/// Cascading delete rooted at one table
pub struct Cleanup<'a> {
    store: &'a SqliteStore,
    dependents: DependentTables<'a>,
}

impl<'a> Cleanup<'a> {
    pub fn new(store: &'a SqliteStore, root: TableHandle) -> Result<Self> {
        Ok(Self {
            store,
            dependents: DependentTables::new(store, root)?,
        })
    }

    /// Compute the rows each dependent table would lose
    pub fn plan(&self, ctx: &mut BindingContext, restriction: &Restriction) -> Result<DeletePlan> {
        let conditions = self.cascade_conditions(restriction)?;
        let mut entries = Vec::new();

        for table in self.dependents.table_list(ctx, false)? {
            let condition = conditions
                .get(&table.table.full_name())
                .cloned()
                .ok_or_else(|| Error::TableNotFound(table.table.full_name()))?;
            let rows = self.store.count_where(&table.table, &condition, &restriction.params)?;
            entries.push(PlannedDelete { table, rows, condition });
        }

        Ok(DeletePlan {
            root: self.dependents.root().clone(),
            entries,
            params: restriction.params.clone(),
        })
    }

    /// Delete the restricted rows and everything downstream of them.
    ///
    /// With `safemode`, `confirm` sees the plan first and may refuse.
    pub fn delete<F>(
        &self,
        ctx: &mut BindingContext,
        restriction: &Restriction,
        opts: DeleteOptions,
        confirm: F,
    ) -> Result<DeleteReport>
    where
        F: FnOnce(&DeletePlan) -> bool,
    {
        let plan = self.plan(ctx, restriction)?;
        if plan.is_empty() {
            tracing::info!("Nothing to delete from {}", plan.root);
            return Ok(DeleteReport::default());
        }
        if opts.safemode && !confirm(&plan) {
            return Err(Error::DeleteAborted(plan.root.full_name()));
        }

        let deletes: Vec<(TableHandle, String, Vec<Value>)> = plan
            .entries
            .iter()
            .rev()
            .map(|e| (e.table.table.clone(), e.condition.clone(), plan.params.clone()))
            .collect();
        let counts = self.store.delete_where(&deletes)?;

        let report = DeleteReport {
            deleted: deletes.into_iter().map(|(t, _, _)| t).zip(counts).rev().collect(),
        };
        tracing::info!("Deleted {} rows downstream of {}", report.total_rows(), plan.root);
        Ok(report)
    }

    /// Condition selecting the affected rows of every descendant table
    fn cascade_conditions(&self, restriction: &Restriction) -> Result<HashMap<String, String>> {
        let graph = self.dependents.graph();
        let mut conditions: HashMap<String, String> = HashMap::new();
        conditions.insert(self.dependents.root().full_name(), restriction.condition.clone());

        for node in self.dependents.descendants().iter().skip(1) {
            if node.parse::<i64>().is_ok() {
                continue;
            }
            let child = TableHandle::parse_full_name(node)?;

            let mut clauses = Vec::new();
            for edge in graph.parents(node) {
                // an alias node stands between the table and its real parent
                let parent = if edge.parent.parse::<i64>().is_ok() {
                    match graph.parents(&edge.parent).first() {
                        Some(up) => up.parent.clone(),
                        None => continue,
                    }
                } else {
                    edge.parent.clone()
                };
                let Some(parent_condition) = conditions.get(&parent) else {
                    continue;
                };
                let parent_table = TableHandle::parse_full_name(&parent)?;
                clauses.push(reference_clause(&parent_table, parent_condition, &edge.attr_map));
            }

            if clauses.is_empty() {
                return Err(Error::TableNotFound(child.full_name()));
            }
            conditions.insert(node.clone(), format!("({})", clauses.join(" OR ")));
        }
        Ok(conditions)
    }
}

fn reference_clause(parent: &TableHandle, parent_condition: &str, attr_map: &[(String, String)]) -> String {
    let child_cols: Vec<String> = attr_map.iter().map(|(c, _)| quote_ident(c)).collect();
    let parent_cols: Vec<String> = attr_map.iter().map(|(_, p)| quote_ident(p)).collect();
    let lhs = if child_cols.len() == 1 {
        child_cols[0].clone()
    } else {
        format!("({})", child_cols.join(", "))
    };
    format!(
        "{} IN (SELECT {} FROM {}.{} WHERE {})",
        lhs,
        parent_cols.join(", "),
        quote_ident(&parent.schema),
        quote_ident(&parent.table),
        parent_condition
    )
}

/// Delete previously ingested `AlyxRaw` records of `model` and their fields
pub fn delete_model<F>(
    store: &SqliteStore,
    schema: &str,
    model: &str,
    opts: DeleteOptions,
    confirm: F,
) -> Result<DeleteReport>
where
    F: FnOnce(&DeletePlan) -> bool,
{
    let mut ctx = BindingContext::new().with_module(alyxraw_module(schema));
    let cleanup = Cleanup::new(store, TableHandle::new(schema, ALYX_RAW))?;
    cleanup.delete(&mut ctx, &Restriction::attribute_eq("model", model.to_string()), opts, confirm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FieldRow, InsertOptions, RawRow};
    use uuid::Uuid;

    const SCHEMA: &str = "ibl_alyxraw";

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema(SCHEMA, None).unwrap();
        store.declare_alyxraw(SCHEMA).unwrap();
        store
            .execute_batch(
                "CREATE TABLE ibl_alyxraw.ingest_log (
                     raw_uuid BLOB NOT NULL REFERENCES alyx_raw(uuid),
                     note TEXT NOT NULL,
                     PRIMARY KEY (raw_uuid, note));",
            )
            .unwrap();

        let raws = [
            RawRow { uuid: Uuid::from_u128(1), model: "experiments.channel".into() },
            RawRow { uuid: Uuid::from_u128(2), model: "experiments.channel".into() },
            RawRow { uuid: Uuid::from_u128(3), model: "subjects.subject".into() },
        ];
        store.insert_rows(SCHEMA, &raws, InsertOptions::default()).unwrap();
        let fields: Vec<FieldRow> = raws
            .iter()
            .map(|r| FieldRow { uuid: r.uuid, fname: "name".into(), value_idx: 0, fvalue: "x".into() })
            .collect();
        store.insert_rows(SCHEMA, &fields, InsertOptions::default()).unwrap();
        store
            .execute_batch(
                "INSERT INTO ibl_alyxraw.ingest_log
                 SELECT uuid, 'migrated' FROM ibl_alyxraw.alyx_raw;",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_plan_counts_dependents() {
        let store = seeded_store();
        let mut ctx = BindingContext::new().with_module(alyxraw_module(SCHEMA));
        let cleanup = Cleanup::new(&store, TableHandle::new(SCHEMA, ALYX_RAW)).unwrap();

        let plan = cleanup
            .plan(&mut ctx, &Restriction::attribute_eq("model", "experiments.channel".to_string()))
            .unwrap();
        assert_eq!(plan.entries.len(), 3);
        assert!(plan.entries.iter().all(|e| e.rows == 2));
        assert_eq!(plan.total_rows(), 6);
    }

    #[test]
    fn test_delete_model_cascades() {
        let store = seeded_store();
        let report = delete_model(&store, SCHEMA, "experiments.channel", DeleteOptions { safemode: false }, |_| {
            panic!("safemode is off")
        })
        .unwrap();

        assert_eq!(report.total_rows(), 6);
        assert!(store.fetch_raw(SCHEMA, "experiments.channel").unwrap().is_empty());
        assert_eq!(store.fetch_raw(SCHEMA, "subjects.subject").unwrap().len(), 1);
        assert_eq!(store.fetch_fields(SCHEMA, &Uuid::from_u128(3)).unwrap().len(), 1);
        assert!(store.fetch_fields(SCHEMA, &Uuid::from_u128(1)).unwrap().is_empty());
    }

    #[test]
    fn test_safemode_refusal_keeps_rows() {
        let store = seeded_store();
        let result = delete_model(&store, SCHEMA, "experiments.channel", DeleteOptions::default(), |plan| {
            assert_eq!(plan.total_rows(), 6);
            false
        });

        assert!(matches!(result, Err(Error::DeleteAborted(_))));
        assert_eq!(store.fetch_raw(SCHEMA, "experiments.channel").unwrap().len(), 2);
    }

    #[test]
    fn test_nothing_to_delete() {
        let store = seeded_store();
        let report = delete_model(&store, SCHEMA, "actions.weighing", DeleteOptions::default(), |_| {
            panic!("empty plans are not confirmed")
        })
        .unwrap();
        assert_eq!(report.total_rows(), 0);
    }
}
