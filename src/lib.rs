//! # alyxraw-migrate - raw Alyx record migration
//!
//! Cleanup and re-ingestion tooling for the `AlyxRaw` key-value tables of a
//! DataJoint-style pipeline stored in SQLite.
//!
//! alyxraw-migrate provides:
//! - A schema dependency graph built from foreign-key metadata
//! - Dependent-table resolution through an explicit binding registry
//! - Buffered, duplicate-tolerant ingestion of `alyxfull.json` exports
//! - Cascading delete of previously ingested records by model

pub mod table;
pub mod graph;
pub mod dependents;
pub mod cleanup;
pub mod storage;
pub mod ingest;
pub mod config;
pub mod output;
pub mod ui;

// Re-exports for convenient access
pub use table::TableHandle;
pub use graph::DependencyGraph;
pub use dependents::{BindingContext, DependentTables, ResolvedTable, TableLabel};
pub use cleanup::{Cleanup, DeleteOptions, DeletePlan};
pub use storage::SqliteStore;
pub use ingest::{IngestReport, RawIngestor};

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed table name: {0}")]
    MalformedTableName(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Invalid value for field '{field}' in record {record}: {reason}")]
    InvalidField {
        record: usize,
        field: String,
        reason: String,
    },

    #[error("Delete of {0} aborted")]
    DeleteAborted(String),
}
