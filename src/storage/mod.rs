//! Storage Layer - SQLite-backed persistence
//!
//! Every attached SQLite database is one schema. The raw schema holds:
//! - alyx_raw(uuid, model)
//! - alyx_raw__field(uuid, fname, value_idx, fvalue)

pub mod schema;
pub mod sqlite;

pub use sqlite::{
    FieldRow, ForeignKey, InsertOptions, InsertOutcome, ModelStats, RawRow, RawStats, SqliteStore,
    TableRow,
};
