//! Record sources feeding paged sessions.
//!
//! A source is a forward-only stream of raw records (typically a database
//! cursor). Raw records are what the swap stores; the paired
//! [`RecordSerializer`] renders a raw record into a page's wire form.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::Arc;

use crate::page::escape_xml;
use crate::types::{CacheError, Result};

/// Renders raw records into `<Record>` sub-documents.
pub trait RecordSerializer: Send + Sync {
    /// Returns the XML content of the record element at `slot` of a page.
    fn to_xml(&self, slot: usize, raw: &str) -> Result<String>;
}

/// Forward-only stream of raw records.
pub trait RecordSource: Send {
    /// Returns the next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<String>>;

    /// Serializer for records produced by this source.
    fn serializer(&self) -> Arc<dyn RecordSerializer>;

    /// Releases cursors, connections and similar resources.
    ///
    /// Called exactly once by the session, after the source was drained or
    /// as soon as it is known that no draining is needed.
    fn release_resources(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Turns a formatted query into a record source.
pub trait QueryExecutor: Send + Sync {
    /// Executes `query` and returns a source over its results.
    fn execute_query(&self, query: &str) -> Result<Box<dyn RecordSource>>;
}

/// Serializer that wraps the raw record as escaped text.
#[derive(Default, Debug, Clone, Copy)]
pub struct XmlTextSerializer;

impl RecordSerializer for XmlTextSerializer {
    fn to_xml(&self, _slot: usize, raw: &str) -> Result<String> {
        Ok(escape_xml(raw))
    }
}

/// In-memory record source.
pub struct VecSource {
    records: VecDeque<String>,
    serializer: Arc<dyn RecordSerializer>,
}

impl VecSource {
    /// Creates a source yielding `records` in order, rendered as escaped text.
    pub fn new<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_serializer(records, Arc::new(XmlTextSerializer))
    }

    /// Creates a source with a custom serializer.
    pub fn with_serializer<I, S>(records: I, serializer: Arc<dyn RecordSerializer>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: records.into_iter().map(Into::into).collect(),
            serializer,
        }
    }
}

impl RecordSource for VecSource {
    fn next_record(&mut self) -> Result<Option<String>> {
        Ok(self.records.pop_front())
    }

    fn serializer(&self) -> Arc<dyn RecordSerializer> {
        Arc::clone(&self.serializer)
    }
}

/// Source yielding one record per non-empty line of a reader.
pub struct LineSource<R> {
    reader: Option<R>,
    line: String,
}

impl<R: BufRead + Send> LineSource<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            line: String::new(),
        }
    }
}

impl<R: BufRead + Send> RecordSource for LineSource<R> {
    fn next_record(&mut self) -> Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        loop {
            self.line.clear();
            let read = reader.read_line(&mut self.line).map_err(CacheError::from)?;
            if read == 0 {
                return Ok(None);
            }
            let record = self.line.trim_end_matches(['\r', '\n']);
            if !record.is_empty() {
                return Ok(Some(record.to_owned()));
            }
        }
    }

    fn serializer(&self) -> Arc<dyn RecordSerializer> {
        Arc::new(XmlTextSerializer)
    }

    fn release_resources(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// Owns a source and guarantees `release_resources` runs exactly once.
pub(crate) struct SourceLease {
    source: Box<dyn RecordSource>,
    released: bool,
}

impl SourceLease {
    pub(crate) fn new(source: Box<dyn RecordSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub(crate) fn next_record(&mut self) -> Result<Option<String>> {
        if self.released {
            return Ok(None);
        }
        self.source.next_record()
    }

    pub(crate) fn serializer(&self) -> Arc<dyn RecordSerializer> {
        self.source.serializer()
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.source.release_resources() {
            tracing::warn!(error = %err, "source.release.error");
        }
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.release();
    }
}
