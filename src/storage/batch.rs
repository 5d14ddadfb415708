//! Buffered multi-row tag inserts

use super::store::TagStore;
use crate::Result;
use crate::tag::NewTag;

/// Collects insert requests in memory and writes them in one
/// [`TagStore::bulk_insert_tags`] call.
///
/// Nothing is validated or written until [`flush`](Self::flush) or
/// [`finish`](Self::finish). Rows still buffered when the inserter is
/// dropped are flushed then; a failure at that point can only be logged.
pub struct BatchInserter<'a> {
    store: &'a TagStore,
    buffer: Vec<NewTag>,
    written: usize,
}

impl<'a> BatchInserter<'a> {
    pub fn new(store: &'a TagStore) -> Self {
        Self {
            store,
            buffer: Vec::new(),
            written: 0,
        }
    }

    /// Buffer one insert. A missing `file_path` fails at flush time.
    pub fn execute(
        &mut self,
        category: &str,
        identifier: &str,
        description: Option<&str>,
        file_path: Option<&str>,
        line_number: Option<u32>,
    ) -> &mut Self {
        self.buffer.push(NewTag {
            category: category.to_string(),
            identifier: identifier.to_string(),
            description: description.map(str::to_string),
            file_path: file_path.unwrap_or_default().to_string(),
            line_number,
        });
        self
    }

    /// Buffer an already-built record
    pub fn push(&mut self, tag: NewTag) -> &mut Self {
        self.buffer.push(tag);
        self
    }

    /// Number of buffered, unwritten records
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Rows written by earlier flushes
    pub fn written(&self) -> usize {
        self.written
    }

    /// Write everything buffered so far as one batch.
    ///
    /// The buffer is emptied whether or not the write succeeds.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let pending = std::mem::take(&mut self.buffer);
        let rows = self.store.bulk_insert_tags(&pending)?;
        self.written += rows;
        Ok(rows)
    }

    /// Flush and return the total number of rows this inserter wrote
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.written)
    }

    /// Drop every buffered record without writing it
    pub fn discard(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(rows = self.buffer.len(), "discarding buffered tags");
            self.buffer.clear();
        }
    }
}

impl Drop for BatchInserter<'_> {
    fn drop(&mut self) {
        if self.buffer.is_empty() || std::thread::panicking() {
            return;
        }
        let rows = self.buffer.len();
        if let Err(err) = self.flush() {
            tracing::error!(rows, error = %err, "batch flush on drop failed");
        }
    }
}

impl TagStore {
    /// Start buffering inserts against this store
    pub fn batch(&self) -> BatchInserter<'_> {
        BatchInserter::new(self)
    }

    /// Buffer inserts in `f` and flush them once it returns `Ok`.
    /// On `Err` the buffer is discarded and nothing is written.
    pub fn batch_insert<F>(&self, f: F) -> Result<usize>
    where
        F: FnOnce(&mut BatchInserter<'_>) -> Result<()>,
    {
        let mut batch = self.batch();
        match f(&mut batch) {
            Ok(()) => batch.finish(),
            Err(err) => {
                batch.discard();
                Err(err)
            }
        }
    }
}
