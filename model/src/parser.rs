//! Query-language parser contract.

use thiserror::Error;

use crate::query::{QueryDocument, TimeRange};

#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not well-formed.
    #[error("{0}")]
    Syntax(String),
    /// The payload is well-formed but cannot be turned into a query.
    #[error("{0}")]
    Query(String),
    /// Field-level violations, every one of them.
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),
}

pub trait QueryParser: Send + Sync {
    /// Parse a read query. A start bound is required; the end defaults to
    /// now.
    fn parse_query(&self, text: &str) -> Result<QueryDocument, ParseError>;

    /// Parse a delete document. Omitted bounds fall back to `full_range`.
    fn parse_delete(&self, text: &str, full_range: TimeRange)
        -> Result<QueryDocument, ParseError>;
}
