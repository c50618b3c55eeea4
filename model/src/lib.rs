//! Shared types and collaborator contracts for the time-series gateway.
//!
//! The gateway never talks to a concrete storage engine, query parser or
//! result formatter directly. Everything it needs from them is expressed by
//! the traits in this crate:
//!
//! | Trait                                   | Collaborator          |
//! |-----------------------------------------|-----------------------|
//! | [`Datastore`], [`DatastoreQuery`]       | storage engine        |
//! | [`DataPointGroup`]                      | per-group result scan |
//! | [`QueryParser`]                         | query-language parser |
//! | [`DataFormatter`]                       | result formatter      |
//!
//! [`MemoryDatastore`] is an in-process storage engine used for local runs
//! and tests.

pub mod datapoint;
pub mod datastore;
pub mod formatter;
pub mod memory;
pub mod parser;
pub mod plugin;
pub mod query;
pub mod spool;

pub use datapoint::{DataPoint, DataPointEvent, DataPointSet, DataValue, Tags};
pub use datastore::{
    DataPointGroup, Datastore, DatastoreError, DatastoreQuery, GroupByResult, QueryHandle,
    ResultGroups,
};
pub use formatter::{DataFormatter, FormatterError};
pub use memory::{FailureMode, MemoryDatastore};
pub use parser::{ParseError, QueryParser};
pub use plugin::{PluginError, PostProcessingPlugin, PreProcessingPlugin, QueryPlugin};
pub use query::{Order, QueryDocument, QueryMetric, TimeRange};
pub use spool::{SpoolFile, SpoolWriter};
