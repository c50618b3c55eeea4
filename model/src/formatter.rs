//! Result formatter contract.

use std::io::Write;

use thiserror::Error;

use crate::datastore::ResultGroups;

#[derive(Debug, Error)]
pub enum FormatterError {
    #[error("formatter io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    MemoryExhausted(String),
    #[error("format error: {0}")]
    Format(String),
}

impl From<serde_json::Error> for FormatterError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            FormatterError::Io(e.into())
        } else {
            FormatterError::Format(e.to_string())
        }
    }
}

/// Streams query results into a wire format.
///
/// A query response is written as `begin`, one `format_query` per
/// sub-query in order, then `end`. Implementations must not buffer the
/// whole response.
pub trait DataFormatter: Send + Sync {
    fn begin(&self, out: &mut dyn Write, original_query: Option<&str>)
        -> Result<(), FormatterError>;

    /// `index` is the 0-based position of the sub-query in the response.
    fn format_query(
        &self,
        out: &mut dyn Write,
        index: usize,
        groups: &mut ResultGroups,
        exclude_tags: bool,
        sample_size: Option<u64>,
    ) -> Result<(), FormatterError>;

    fn end(&self, out: &mut dyn Write) -> Result<(), FormatterError>;

    /// Render a flat list of strings, e.g. metric names.
    fn format_values(&self, out: &mut dyn Write, values: &[String]) -> Result<(), FormatterError>;
}
