//! Raw record ingestion
//!
//! Reads an Alyx JSON export and loads the records of one model into the
//! `AlyxRaw` table and its `AlyxRaw.Field` part table. Runs in two passes:
//! all master rows first, then the field rows of every record.

pub mod buffer;
pub mod normalize;
pub mod pyfmt;
pub mod record;
pub mod value;

use std::path::Path;
use indicatif::ProgressBar;
use serde::Serialize;
use crate::storage::{FieldRow, InsertOptions, RawRow, SqliteStore};
use crate::{Error, Result};

pub use buffer::InsertBuffer;
pub use normalize::{normalize_field, FieldEntry, FieldOutcome, NormalizeError, DEFAULT_JSON_MAX_LEN};
pub use record::{load_records, parse_records, RawRecord};
pub use value::{FieldValue, Number};

/// Model ingested when none is given
pub const DEFAULT_MODEL: &str = "experiments.channel";

/// Rows buffered before a flush
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

const SKIP_DUPLICATES: InsertOptions = InsertOptions { skip_duplicates: true };

/// Ingestion settings
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Only records of this model are ingested
    pub model: String,
    pub chunk_size: usize,
    /// Serialized `json` fields at or above this many characters are dropped
    pub json_max_len: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            json_max_len: DEFAULT_JSON_MAX_LEN,
        }
    }
}

/// Counts of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub model: String,
    /// Records of the model found in the export
    pub records: usize,
    /// Records skipped because their pk is not a UUID
    pub skipped_pk: usize,
    pub raw_inserted: usize,
    pub fields_inserted: usize,
    /// `json` fields dropped for length
    pub oversized: usize,
    /// Rows already present and left untouched
    pub duplicates: usize,
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Ingest Report ({}):", self.model)?;
        writeln!(f, "  Records:         {}", self.records)?;
        writeln!(f, "  Skipped (pk):    {}", self.skipped_pk)?;
        writeln!(f, "  Raw inserted:    {}", self.raw_inserted)?;
        writeln!(f, "  Fields inserted: {}", self.fields_inserted)?;
        writeln!(f, "  Oversized json:  {}", self.oversized)?;
        writeln!(f, "  Duplicates:      {}", self.duplicates)?;
        Ok(())
    }
}

/// Loads raw records of one model into a raw schema
pub struct RawIngestor<'a> {
    store: &'a SqliteStore,
    schema: String,
    options: IngestOptions,
    progress: ProgressBar,
}

impl<'a> RawIngestor<'a> {
    pub fn new(store: &'a SqliteStore, schema: impl Into<String>, options: IngestOptions) -> Self {
        Self {
            store,
            schema: schema.into(),
            options,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on `bar`; its length is set per pass
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Ingest the export at `path`
    pub fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        tracing::info!("Loading {}", path.display());
        let records = load_records(path)?;
        tracing::info!("Loaded {} records", records.len());
        self.ingest_records(&records)
    }

    /// Ingest the records of the configured model out of `records`
    pub fn ingest_records(&self, records: &[RawRecord]) -> Result<IngestReport> {
        let selected: Vec<&RawRecord> = records
            .iter()
            .filter(|r| r.model == self.options.model)
            .collect();

        let mut report = IngestReport {
            model: self.options.model.clone(),
            records: selected.len(),
            ..Default::default()
        };
        tracing::info!("Ingesting {} records of {}", selected.len(), self.options.model);

        self.insert_raw(&selected, &mut report)?;
        self.insert_fields(&selected, &mut report)?;

        self.progress.finish_and_clear();
        Ok(report)
    }

    fn insert_raw(&self, records: &[&RawRecord], report: &mut IngestReport) -> Result<()> {
        let chunk = Some(self.options.chunk_size);
        let mut buffer = InsertBuffer::<RawRow>::new(self.store, &self.schema);
        self.start_pass("AlyxRaw", records.len());

        for record in records {
            self.progress.inc(1);
            let uuid = match record.uuid() {
                Ok(uuid) => uuid,
                Err(e) => {
                    tracing::warn!("Skipping record with pk {}: {}", record.pk, e);
                    report.skipped_pk += 1;
                    continue;
                }
            };
            buffer.insert1(RawRow { uuid, model: record.model.clone() });

            let flushed = buffer.flush(SKIP_DUPLICATES, chunk)?;
            if flushed > 0 {
                tracing::debug!("Inserted {} rows into AlyxRaw", flushed);
            }
        }
        buffer.flush(SKIP_DUPLICATES, None)?;

        let totals = buffer.totals();
        report.raw_inserted = totals.inserted;
        report.duplicates += totals.skipped;
        Ok(())
    }

    fn insert_fields(&self, records: &[&RawRecord], report: &mut IngestReport) -> Result<()> {
        let chunk = Some(self.options.chunk_size);
        let mut buffer = InsertBuffer::<FieldRow>::new(self.store, &self.schema);
        self.start_pass("AlyxRaw.Field", records.len());

        for (index, record) in records.iter().enumerate() {
            self.progress.inc(1);
            // pk failures were reported by the first pass
            let Ok(uuid) = record.uuid() else { continue };

            for (name, value) in &record.fields {
                let outcome = normalize_field(name, value, self.options.json_max_len).map_err(|e| {
                    tracing::error!("Error on record {} ({}), field {}: {}", index, record.pk, name, e);
                    Error::InvalidField {
                        record: index,
                        field: name.clone(),
                        reason: e.to_string(),
                    }
                })?;

                match outcome {
                    FieldOutcome::Entries(entries) => buffer.insert(entries.into_iter().map(|entry| FieldRow {
                        uuid,
                        fname: name.clone(),
                        value_idx: entry.value_idx,
                        fvalue: entry.fvalue,
                    })),
                    FieldOutcome::Oversized { len } => {
                        tracing::debug!("Dropping json of record {} ({} characters)", record.pk, len);
                        report.oversized += 1;
                    }
                }

                let flushed = buffer.flush(SKIP_DUPLICATES, chunk)?;
                if flushed > 0 {
                    tracing::debug!("Inserted {} rows into AlyxRaw.Field", flushed);
                }
            }
        }
        buffer.flush(SKIP_DUPLICATES, None)?;

        let totals = buffer.totals();
        report.fields_inserted = totals.inserted;
        report.duplicates += totals.skipped;
        Ok(())
    }

    fn start_pass(&self, table: &str, len: usize) {
        self.progress.reset();
        self.progress.set_length(len as u64);
        self.progress.set_message(format!("Ingesting into {}", table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use uuid::Uuid;

    const RAW: &str = "ibl_alyxraw";
    const PK1: &str = "6f2a3c1e-0b5d-4e8f-9a7c-1d2e3f4a5b6c";
    const PK2: &str = "7a8b9c0d-1e2f-4a3b-8c4d-5e6f7a8b9c0d";

    fn raw_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema(RAW, None).unwrap();
        store.declare_alyxraw(RAW).unwrap();
        store
    }

    fn ingest(store: &SqliteStore, export: &str) -> Result<IngestReport> {
        let records = parse_records(export)?;
        RawIngestor::new(store, RAW, IngestOptions::default()).ingest_records(&records)
    }

    fn fields_of(store: &SqliteStore, pk: &str) -> Vec<(String, u32, String)> {
        store
            .fetch_fields(RAW, &Uuid::parse_str(pk).unwrap())
            .unwrap()
            .into_iter()
            .map(|f| (f.fname, f.value_idx, f.fvalue))
            .collect()
    }

    fn export(fields: &str) -> String {
        format!(r#"[{{"model": "experiments.channel", "pk": "{}", "fields": {}}}]"#, PK1, fields)
    }

    #[test]
    fn test_json_field() {
        let store = raw_store();
        ingest(&store, &export(r#"{"json": {"a": 1}}"#)).unwrap();
        assert_eq!(fields_of(&store, PK1), vec![("json".into(), 0, r#"{"a": 1}"#.into())]);
    }

    #[test]
    fn test_narrative_without_emoji() {
        let store = raw_store();
        ingest(&store, &export(r#"{"narrative": "mouse ok 😀 done"}"#)).unwrap();
        assert_eq!(fields_of(&store, PK1), vec![("narrative".into(), 0, "mouse ok  done".into())]);
    }

    #[test]
    fn test_null_and_list_fields() {
        let store = raw_store();
        ingest(&store, &export(r#"{"x": null, "tags": ["a", "b"], "depth": NaN, "n": 3}"#)).unwrap();
        assert_eq!(
            fields_of(&store, PK1),
            vec![
                ("depth".into(), 0, "None".into()),
                ("n".into(), 0, "3".into()),
                ("tags".into(), 0, "a".into()),
                ("tags".into(), 1, "b".into()),
                ("x".into(), 0, "None".into()),
            ]
        );
    }

    #[test]
    fn test_non_finite_values_keep_their_python_form() {
        let store = raw_store();
        ingest(
            &store,
            &export(r#"{"coords": [1.5, NaN], "depth": Infinity, "json": {"a": NaN, "b": -Infinity}}"#),
        )
        .unwrap();
        assert_eq!(
            fields_of(&store, PK1),
            vec![
                ("coords".into(), 0, "[1.5, nan]".into()),
                ("depth".into(), 0, "inf".into()),
                ("json".into(), 0, r#"{"a": NaN, "b": -Infinity}"#.into()),
            ]
        );
    }

    #[test]
    fn test_invalid_pk_is_skipped() {
        let store = raw_store();
        let report = ingest(
            &store,
            &format!(
                r#"[{{"model": "experiments.channel", "pk": "nope", "fields": {{"a": 1}}}},
                    {{"model": "experiments.channel", "pk": "{}", "fields": {{"a": 2}}}}]"#,
                PK2
            ),
        )
        .unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.skipped_pk, 1);
        assert_eq!(report.raw_inserted, 1);
        assert_eq!(store.fetch_raw(RAW, "experiments.channel").unwrap().len(), 1);
        assert_eq!(fields_of(&store, PK2), vec![("a".into(), 0, "2".into())]);
    }

    #[test]
    fn test_other_models_are_ignored() {
        let store = raw_store();
        let report = ingest(
            &store,
            &format!(r#"[{{"model": "subjects.subject", "pk": "{}", "fields": {{"a": 1}}}}]"#, PK1),
        )
        .unwrap();
        assert_eq!(report.records, 0);
        assert!(store.fetch_raw(RAW, "subjects.subject").unwrap().is_empty());
    }

    #[test]
    fn test_rerun_adds_no_rows() {
        let store = raw_store();
        let data = export(r#"{"name": "ch0", "tags": ["a", "b"]}"#);

        let first = ingest(&store, &data).unwrap();
        assert_eq!((first.raw_inserted, first.fields_inserted, first.duplicates), (1, 3, 0));

        let second = ingest(&store, &data).unwrap();
        assert_eq!((second.raw_inserted, second.fields_inserted, second.duplicates), (0, 0, 4));
        assert_eq!(fields_of(&store, PK1).len(), 3);
    }

    #[test]
    fn test_oversized_json_is_counted() {
        let store = raw_store();
        let big = "x".repeat(DEFAULT_JSON_MAX_LEN);
        let report = ingest(&store, &export(&format!(r#"{{"json": {{"blob": "{}"}}, "n": 1}}"#, big))).unwrap();

        assert_eq!(report.oversized, 1);
        assert_eq!(fields_of(&store, PK1), vec![("n".into(), 0, "1".into())]);
    }

    #[test]
    fn test_bad_narrative_aborts() {
        let store = raw_store();
        let data = format!(
            r#"[{{"model": "experiments.channel", "pk": "{}", "fields": {{"a": 1}}}},
                {{"model": "experiments.channel", "pk": "{}", "fields": {{"narrative": 5}}}}]"#,
            PK1, PK2
        );

        let err = ingest(&store, &data).unwrap_err();
        assert!(matches!(err, Error::InvalidField { record: 1, ref field, .. } if field == "narrative"));
    }

    #[test]
    fn test_small_chunks() {
        let store = raw_store();
        let data = export(r#"{"tags": ["a", "b", "c", "d", "e"]}"#);
        let options = IngestOptions { chunk_size: 2, ..Default::default() };

        let report = RawIngestor::new(&store, RAW, options)
            .ingest_records(&parse_records(&data).unwrap())
            .unwrap();
        assert_eq!(report.fields_inserted, 5);
    }

    #[test]
    fn test_ingest_file() {
        let store = raw_store();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(export(r#"{"lab": "cortexlab"}"#).as_bytes()).unwrap();

        let report = RawIngestor::new(&store, RAW, IngestOptions::default())
            .ingest_file(file.path())
            .unwrap();
        assert_eq!(report.raw_inserted, 1);
        assert_eq!(fields_of(&store, PK1), vec![("lab".into(), 0, "cortexlab".into())]);
    }
}
