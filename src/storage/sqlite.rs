//! SQLite storage implementation

use std::path::Path;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use uuid::Uuid;
use crate::{Error, Result};
use crate::table::TableHandle;
use super::schema::{self, quote_ident, ALYX_RAW, ALYX_RAW_FIELD};

/// A row that can be batch-inserted into one table of a schema.
pub trait TableRow {
    /// Table name inside its schema
    const TABLE: &'static str;
    /// Column names in the order of [`TableRow::values`]
    const COLUMNS: &'static [&'static str];

    /// Column values of this row
    fn values(&self) -> Vec<Value>;
}

/// Options for batch inserts
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOptions {
    /// Ignore rows whose primary key already exists instead of failing
    pub skip_duplicates: bool,
}

/// Outcome of a batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Foreign key declared by a table, as reported by SQLite
#[derive(Debug, Clone)]
pub struct ForeignKey {
    /// Referenced table (same schema)
    pub parent_table: String,
    /// (referencing column, referenced column); the referenced column is
    /// `None` when the key targets the parent's primary key implicitly
    pub columns: Vec<(String, Option<String>)>,
}

/// SQLite-backed storage; each attached database is one schema
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Run raw SQL statements
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ========== Schema Operations ==========

    /// Attach a database file as schema `name`; `None` attaches an in-memory database.
    /// Attaching an already attached schema is a no-op.
    pub fn attach_schema(&self, name: &str, path: Option<&Path>) -> Result<()> {
        if self.has_schema(name)? {
            return Ok(());
        }
        let location = match path {
            Some(p) => p.to_string_lossy().to_string(),
            None => ":memory:".to_string(),
        };
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(name)),
            [location],
        )?;
        tracing::debug!("Attached schema {}", name);
        Ok(())
    }

    /// Names of all schemas, main first
    pub fn schemas(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM pragma_database_list WHERE name != 'temp' ORDER BY seq",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Check whether a schema is attached
    pub fn has_schema(&self, name: &str) -> Result<bool> {
        Ok(self.schemas()?.iter().any(|s| s == name))
    }

    /// Tables of a schema, sorted by name
    pub fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        if !self.has_schema(schema)? {
            return Err(Error::UnknownSchema(schema.to_string()));
        }
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tables)
    }

    /// Primary-key columns of a table, in key order
    pub fn primary_key(&self, table: &TableHandle) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk",
        )?;
        let columns = stmt
            .query_map(params![table.table, table.schema], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(columns)
    }

    /// Foreign keys declared by a table
    pub fn foreign_keys(&self, table: &TableHandle) -> Result<Vec<ForeignKey>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, "table", "from", "to" FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq"#,
        )?;
        let rows = stmt
            .query_map(params![table.table, table.schema], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut keys: Vec<(i64, ForeignKey)> = Vec::new();
        for (id, parent, from, to) in rows {
            match keys.last_mut() {
                Some((last_id, fk)) if *last_id == id => fk.columns.push((from, to)),
                _ => keys.push((
                    id,
                    ForeignKey {
                        parent_table: parent,
                        columns: vec![(from, to)],
                    },
                )),
            }
        }
        Ok(keys.into_iter().map(|(_, fk)| fk).collect())
    }

    /// Count rows of a table matching an SQL condition
    pub fn count_where(&self, table: &TableHandle, condition: &str, params: &[Value]) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{} WHERE {}",
            quote_ident(&table.schema),
            quote_ident(&table.table),
            condition
        );
        let count: i64 = self.conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Declare the `AlyxRaw` tables inside `schema`
    pub fn declare_alyxraw(&self, schema: &str) -> Result<()> {
        if !self.has_schema(schema)? {
            return Err(Error::UnknownSchema(schema.to_string()));
        }
        for stmt in schema::alyxraw_statements(schema) {
            self.conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    // ========== Bulk Operations ==========

    /// Insert rows into `schema` within a single transaction
    pub fn insert_rows<R: TableRow>(&self, schema: &str, rows: &[R], opts: InsertOptions) -> Result<InsertOutcome> {
        let sql = format!(
            "INSERT {}INTO {}.{} ({}) VALUES ({})",
            if opts.skip_duplicates { "OR IGNORE " } else { "" },
            quote_ident(schema),
            quote_ident(R::TABLE),
            R::COLUMNS.join(", "),
            (1..=R::COLUMNS.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", "),
        );

        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = InsertOutcome::default();
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                if stmt.execute(params_from_iter(row.values()))? == 0 {
                    outcome.skipped += 1;
                } else {
                    outcome.inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Delete rows of several tables in one transaction, in the given order.
    /// Each entry is (table, condition, params); returns rows deleted per entry.
    pub fn delete_where(&self, deletes: &[(TableHandle, String, Vec<Value>)]) -> Result<Vec<usize>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut counts = Vec::with_capacity(deletes.len());
        for (table, condition, params) in deletes {
            let sql = format!(
                "DELETE FROM {}.{} WHERE {}",
                quote_ident(&table.schema),
                quote_ident(&table.table),
                condition
            );
            counts.push(tx.execute(&sql, params_from_iter(params))?);
        }
        tx.commit()?;
        Ok(counts)
    }

    // ========== Raw Table Queries ==========

    /// Raw rows of a model, ordered by uuid
    pub fn fetch_raw(&self, schema: &str, model: &str) -> Result<Vec<RawRow>> {
        let sql = format!(
            "SELECT uuid, model FROM {}.{} WHERE model = ?1 ORDER BY uuid",
            quote_ident(schema),
            ALYX_RAW
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([model], |row| {
                Ok(RawRow {
                    uuid: uuid_from_row(row, 0)?,
                    model: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Field rows of one record, ordered by field name and value index
    pub fn fetch_fields(&self, schema: &str, uuid: &Uuid) -> Result<Vec<FieldRow>> {
        let sql = format!(
            "SELECT uuid, fname, value_idx, fvalue FROM {}.{} WHERE uuid = ?1 ORDER BY fname, value_idx",
            quote_ident(schema),
            ALYX_RAW_FIELD
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([uuid.as_bytes().to_vec()], |row| {
                Ok(FieldRow {
                    uuid: uuid_from_row(row, 0)?,
                    fname: row.get(1)?,
                    value_idx: row.get(2)?,
                    fvalue: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Per-model counts of raw records and their field rows
    pub fn raw_stats(&self, schema: &str) -> Result<RawStats> {
        let sql = format!(
            "SELECT r.model, COUNT(DISTINCT r.uuid), COUNT(f.uuid)
             FROM {schema}.{raw} r LEFT JOIN {schema}.{field} f ON f.uuid = r.uuid
             GROUP BY r.model ORDER BY r.model",
            schema = quote_ident(schema),
            raw = ALYX_RAW,
            field = ALYX_RAW_FIELD,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let models = stmt
            .query_map([], |row| {
                Ok(ModelStats {
                    model: row.get(0)?,
                    records: row.get::<_, i64>(1)? as usize,
                    fields: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(RawStats {
            schema: schema.to_string(),
            models,
        })
    }
}

fn uuid_from_row(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let bytes: Vec<u8> = row.get(idx)?;
    Uuid::from_slice(&bytes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Blob, Box::new(e))
    })
}

/// Row of the `AlyxRaw` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub uuid: Uuid,
    pub model: String,
}

impl TableRow for RawRow {
    const TABLE: &'static str = ALYX_RAW;
    const COLUMNS: &'static [&'static str] = &["uuid", "model"];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Blob(self.uuid.as_bytes().to_vec()),
            Value::Text(self.model.clone()),
        ]
    }
}

/// Row of the `AlyxRaw.Field` part table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    pub uuid: Uuid,
    pub fname: String,
    pub value_idx: u32,
    pub fvalue: String,
}

impl TableRow for FieldRow {
    const TABLE: &'static str = ALYX_RAW_FIELD;
    const COLUMNS: &'static [&'static str] = &["uuid", "fname", "value_idx", "fvalue"];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Blob(self.uuid.as_bytes().to_vec()),
            Value::Text(self.fname.clone()),
            Value::Integer(i64::from(self.value_idx)),
            Value::Text(self.fvalue.clone()),
        ]
    }
}

/// Raw table statistics of one schema
#[derive(Debug, Clone)]
pub struct RawStats {
    pub schema: String,
    pub models: Vec<ModelStats>,
}

/// Counts for one model
#[derive(Debug, Clone)]
pub struct ModelStats {
    pub model: String,
    pub records: usize,
    pub fields: usize,
}

impl std::fmt::Display for RawStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Raw Table Statistics ({}):", self.schema)?;
        for m in &self.models {
            writeln!(f, "  {}: {} records, {} fields", m.model, m.records, m.fields)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema("ibl_alyxraw", None).unwrap();
        store.declare_alyxraw("ibl_alyxraw").unwrap();
        store
    }

    fn field(uuid: Uuid, fname: &str, idx: u32, value: &str) -> FieldRow {
        FieldRow {
            uuid,
            fname: fname.to_string(),
            value_idx: idx,
            fvalue: value.to_string(),
        }
    }

    #[test]
    fn test_schemas_and_tables() {
        let store = raw_store();
        assert_eq!(store.schemas().unwrap(), vec!["main", "ibl_alyxraw"]);
        assert_eq!(
            store.list_tables("ibl_alyxraw").unwrap(),
            vec!["alyx_raw", "alyx_raw__field"]
        );
        assert!(matches!(store.list_tables("nope"), Err(Error::UnknownSchema(_))));
    }

    #[test]
    fn test_attach_is_idempotent() {
        let store = raw_store();
        store.attach_schema("ibl_alyxraw", None).unwrap();
        assert_eq!(store.schemas().unwrap().len(), 2);
    }

    #[test]
    fn test_key_metadata() {
        let store = raw_store();
        let field_table = TableHandle::new("ibl_alyxraw", ALYX_RAW_FIELD);
        assert_eq!(store.primary_key(&field_table).unwrap(), vec!["uuid", "fname", "value_idx"]);

        let fks = store.foreign_keys(&field_table).unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].parent_table, ALYX_RAW);
        assert_eq!(fks[0].columns[0].0, "uuid");
    }

    #[test]
    fn test_insert_skip_duplicates() {
        let store = raw_store();
        let row = RawRow { uuid: Uuid::from_u128(1), model: "subjects.subject".into() };

        let first = store.insert_rows("ibl_alyxraw", &[row.clone()], InsertOptions { skip_duplicates: true }).unwrap();
        assert_eq!(first, InsertOutcome { inserted: 1, skipped: 0 });

        let again = store.insert_rows("ibl_alyxraw", &[row.clone()], InsertOptions { skip_duplicates: true }).unwrap();
        assert_eq!(again, InsertOutcome { inserted: 0, skipped: 1 });

        assert!(store.insert_rows("ibl_alyxraw", &[row], InsertOptions::default()).is_err());
    }

    #[test]
    fn test_fields_roundtrip_and_stats() {
        let store = raw_store();
        let uuid = Uuid::from_u128(7);
        store
            .insert_rows("ibl_alyxraw", &[RawRow { uuid, model: "experiments.channel".into() }], InsertOptions::default())
            .unwrap();
        store
            .insert_rows(
                "ibl_alyxraw",
                &[field(uuid, "tags", 1, "b"), field(uuid, "tags", 0, "a")],
                InsertOptions::default(),
            )
            .unwrap();

        let fields = store.fetch_fields("ibl_alyxraw", &uuid).unwrap();
        assert_eq!(fields, vec![field(uuid, "tags", 0, "a"), field(uuid, "tags", 1, "b")]);

        let stats = store.raw_stats("ibl_alyxraw").unwrap();
        assert_eq!(stats.models.len(), 1);
        assert_eq!(stats.models[0].records, 1);
        assert_eq!(stats.models[0].fields, 2);
    }

    #[test]
    fn test_field_requires_raw_row() {
        let store = raw_store();
        let orphan = field(Uuid::from_u128(9), "x", 0, "None");
        assert!(store.insert_rows("ibl_alyxraw", &[orphan], InsertOptions::default()).is_err());
    }
}
