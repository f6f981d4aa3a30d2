//! Insert buffer
//!
//! Accumulates rows for one table and submits them in bulk, trading memory
//! for fewer round trips to the store.

use crate::Result;
use crate::storage::{InsertOptions, InsertOutcome, SqliteStore, TableRow};

pub struct InsertBuffer<'a, R: TableRow> {
    store: &'a SqliteStore,
    schema: String,
    queue: Vec<R>,
    totals: InsertOutcome,
}

impl<'a, R: TableRow> InsertBuffer<'a, R> {
    pub fn new(store: &'a SqliteStore, schema: impl Into<String>) -> Self {
        Self {
            store,
            schema: schema.into(),
            queue: Vec::new(),
            totals: InsertOutcome::default(),
        }
    }

    /// Queue a single row
    pub fn insert1(&mut self, row: R) {
        self.queue.push(row);
    }

    /// Queue several rows
    pub fn insert(&mut self, rows: impl IntoIterator<Item = R>) {
        self.queue.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Submit the queue to the store.
    ///
    /// With `chunk_size`, nothing happens until the queue holds at least that
    /// many rows; without, any non-empty queue is submitted. Returns the
    /// number of rows submitted.
    pub fn flush(&mut self, opts: InsertOptions, chunk_size: Option<usize>) -> Result<usize> {
        let pending = self.queue.len();
        if pending == 0 || chunk_size.is_some_and(|size| pending < size) {
            return Ok(0);
        }

        let outcome = self.store.insert_rows(&self.schema, &self.queue, opts)?;
        self.totals.inserted += outcome.inserted;
        self.totals.skipped += outcome.skipped;
        self.queue.clear();
        Ok(pending)
    }

    /// Rows inserted and skipped over the buffer's lifetime
    pub fn totals(&self) -> InsertOutcome {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RawRow;
    use uuid::Uuid;

    const SKIP: InsertOptions = InsertOptions { skip_duplicates: true };

    fn raw(n: u128) -> RawRow {
        RawRow { uuid: Uuid::from_u128(n), model: "experiments.channel".into() }
    }

    #[test]
    fn test_flush_waits_for_chunk() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.attach_schema("raw", None).unwrap();
        store.declare_alyxraw("raw").unwrap();

        let mut buffer = InsertBuffer::new(&store, "raw");
        buffer.insert((0..2).map(raw));
        assert_eq!(buffer.flush(SKIP, Some(3)).unwrap(), 0);
        assert_eq!(buffer.len(), 2);

        buffer.insert1(raw(2));
        assert_eq!(buffer.flush(SKIP, Some(3)).unwrap(), 3);
        assert!(buffer.is_empty());

        buffer.insert1(raw(0));
        buffer.insert1(raw(9));
        assert_eq!(buffer.flush(SKIP, None).unwrap(), 2);
        assert_eq!(buffer.totals(), InsertOutcome { inserted: 4, skipped: 1 });

        assert_eq!(buffer.flush(SKIP, None).unwrap(), 0);
    }
}
