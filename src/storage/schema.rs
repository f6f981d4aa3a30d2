//! Database schema definitions for the raw Alyx tables

/// Table holding one row per raw record (`AlyxRaw`)
pub const ALYX_RAW: &str = "alyx_raw";

/// Part table holding one row per (record, field, value index) (`AlyxRaw.Field`)
pub const ALYX_RAW_FIELD: &str = "alyx_raw__field";

/// SQL to create the `AlyxRaw` table in schema `{schema}`
const CREATE_ALYX_RAW_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {schema}.alyx_raw (
    uuid BLOB NOT NULL PRIMARY KEY,
    model TEXT NOT NULL
)
"#;

/// SQL to create the `AlyxRaw.Field` part table in schema `{schema}`
const CREATE_ALYX_RAW_FIELD_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {schema}.alyx_raw__field (
    uuid BLOB NOT NULL REFERENCES alyx_raw(uuid),
    fname TEXT NOT NULL,
    value_idx INTEGER NOT NULL,
    fvalue TEXT,
    PRIMARY KEY (uuid, fname, value_idx)
)
"#;

/// SQL to create indexes
const CREATE_INDEXES: &[&str] = &[
    r#"CREATE INDEX IF NOT EXISTS {schema}.idx_alyx_raw_model ON alyx_raw(model)"#,
    r#"CREATE INDEX IF NOT EXISTS {schema}.idx_alyx_raw_field_fname ON alyx_raw__field(fname)"#,
];

/// All statements declaring the raw tables inside `schema`
pub fn alyxraw_statements(schema: &str) -> Vec<String> {
    let mut stmts = vec![CREATE_ALYX_RAW_TABLE, CREATE_ALYX_RAW_FIELD_TABLE];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
        .into_iter()
        .map(|stmt| stmt.replace("{schema}", &quote_ident(schema)))
        .collect()
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
