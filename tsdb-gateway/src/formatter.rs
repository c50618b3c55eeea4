//! JSON rendering of query results.
//!
//! Query responses:
//!
//! ```json
//! {"queries":[{"sample_size":2,"results":[
//!   {"name":"cpu","group_by":[...],"tags":{"host":["a"]},"values":[[1,10],[2,11]]}
//! ]}]}
//! ```
//!
//! with an optional leading `"original_query"` member. Name listings are
//! `{"results":["a","b"]}`.

use std::io::Write;
use std::sync::Arc;

use model::{DataFormatter, FormatterError, ResultGroups};

use crate::memory::MemoryMonitor;

/// Points written between memory checks.
const MEMORY_CHECK_INTERVAL: usize = 1000;

#[derive(Default)]
pub struct JsonFormatter {
    monitor: Option<Arc<MemoryMonitor>>,
}

impl JsonFormatter {
    pub fn new(monitor: Option<Arc<MemoryMonitor>>) -> Self {
        Self { monitor }
    }

    fn check_memory(&self) -> Result<(), FormatterError> {
        match &self.monitor {
            Some(monitor) => monitor.check(),
            None => Ok(()),
        }
    }
}

impl DataFormatter for JsonFormatter {
    fn begin(&self, out: &mut dyn Write, original_query: Option<&str>) -> Result<(), FormatterError> {
        out.write_all(b"{")?;
        if let Some(query) = original_query {
            let query: serde_json::Value = serde_json::from_str(query)?;
            out.write_all(b"\"original_query\":")?;
            serde_json::to_writer(&mut *out, &query)?;
            out.write_all(b",")?;
        }
        out.write_all(b"\"queries\":[")?;
        Ok(())
    }

    fn format_query(
        &self,
        out: &mut dyn Write,
        index: usize,
        groups: &mut ResultGroups,
        exclude_tags: bool,
        sample_size: Option<u64>,
    ) -> Result<(), FormatterError> {
        if index > 0 {
            out.write_all(b",")?;
        }
        out.write_all(b"{")?;
        if let Some(sample_size) = sample_size {
            write!(out, "\"sample_size\":{sample_size},")?;
        }
        out.write_all(b"\"results\":[")?;

        let mut written = 0usize;
        for (i, group) in groups.iter_mut().enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            out.write_all(b"{\"name\":")?;
            serde_json::to_writer(&mut *out, group.name())?;

            if !group.group_by().is_empty() {
                out.write_all(b",\"group_by\":")?;
                serde_json::to_writer(&mut *out, group.group_by())?;
            }
            if !exclude_tags {
                out.write_all(b",\"tags\":")?;
                serde_json::to_writer(&mut *out, group.tags())?;
            }

            out.write_all(b",\"values\":[")?;
            let mut first = true;
            while let Some(point) = group.next_point() {
                if !first {
                    out.write_all(b",")?;
                }
                first = false;
                write!(out, "[{},", point.timestamp)?;
                serde_json::to_writer(&mut *out, &point.value)?;
                out.write_all(b"]")?;

                written += 1;
                if written % MEMORY_CHECK_INTERVAL == 0 {
                    self.check_memory()?;
                }
            }
            out.write_all(b"]}")?;
        }

        out.write_all(b"]}")?;
        Ok(())
    }

    fn end(&self, out: &mut dyn Write) -> Result<(), FormatterError> {
        out.write_all(b"]}")?;
        Ok(())
    }

    fn format_values(&self, out: &mut dyn Write, values: &[String]) -> Result<(), FormatterError> {
        out.write_all(b"{\"results\":")?;
        serde_json::to_writer(&mut *out, values)?;
        out.write_all(b"}")?;
        Ok(())
    }
}
