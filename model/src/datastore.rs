//! Storage engine contract.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::datapoint::{DataPoint, DataPointEvent};
use crate::query::QueryMetric;

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("datastore error: {0}")]
    Backend(String),
    /// The engine refused to materialise more results because the process
    /// is short on memory.
    #[error("memory limit exceeded: {0}")]
    MemoryExhausted(String),
    #[error("datastore io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a group was formed when the query asked for tag grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupByResult {
    pub name: String,
    pub tags: Vec<String>,
    pub group: BTreeMap<String, String>,
}

/// A scan over the points of one result group.
///
/// Groups may hold storage resources (cursors, buffers) until
/// [`close`](DataPointGroup::close) is called.
pub trait DataPointGroup: Send {
    fn name(&self) -> &str;

    /// Every tag value seen across the group's series.
    fn tags(&self) -> &BTreeMap<String, BTreeSet<String>>;

    fn group_by(&self) -> &[GroupByResult] {
        &[]
    }

    fn next_point(&mut self) -> Option<DataPoint>;

    fn close(&mut self) {}
}

/// The groups produced by one sub-query. Every group is closed when this is
/// dropped, whichever way the caller leaves.
#[derive(Default)]
pub struct ResultGroups {
    groups: Vec<Box<dyn DataPointGroup>>,
}

impl ResultGroups {
    pub fn new(groups: Vec<Box<dyn DataPointGroup>>) -> Self {
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn DataPointGroup>> {
        self.groups.iter_mut()
    }
}

impl Drop for ResultGroups {
    fn drop(&mut self) {
        for group in &mut self.groups {
            group.close();
        }
    }
}

impl std::fmt::Debug for ResultGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.groups.iter().map(|g| g.name()))
            .finish()
    }
}

/// An executable plan for a single [`QueryMetric`].
#[async_trait]
pub trait DatastoreQuery: Send {
    async fn execute(&mut self) -> Result<ResultGroups, DatastoreError>;

    /// Number of raw points read by the last execution.
    fn sample_size(&self) -> u64;

    fn close(&mut self);
}

/// Owns a [`DatastoreQuery`] and closes it on drop.
pub struct QueryHandle {
    inner: Box<dyn DatastoreQuery>,
}

impl QueryHandle {
    pub fn new(inner: Box<dyn DatastoreQuery>) -> Self {
        Self { inner }
    }
}

impl Deref for QueryHandle {
    type Target = dyn DatastoreQuery;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for QueryHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// The storage engine as seen by the gateway.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Hand one point to the ingestion channel. Durability is the engine's
    /// concern; this must not block on it.
    fn publish(&self, event: DataPointEvent) -> Result<(), DatastoreError>;

    async fn create_query(&self, metric: &QueryMetric) -> Result<QueryHandle, DatastoreError>;

    /// Series matching the metric, with tags but no points.
    async fn query_tags(&self, metric: &QueryMetric) -> Result<ResultGroups, DatastoreError>;

    async fn delete(&self, metric: &QueryMetric) -> Result<(), DatastoreError>;

    async fn index_tags(&self, metric: &QueryMetric) -> Result<(), DatastoreError>;

    async fn metric_names(&self, prefix: Option<&str>) -> Result<Vec<String>, DatastoreError>;

    async fn tag_names(&self) -> Result<Vec<String>, DatastoreError>;

    async fn tag_values(&self) -> Result<Vec<String>, DatastoreError>;

    fn min_time_value(&self) -> i64;

    fn max_time_value(&self) -> i64;

    /// Writable directory for spool files.
    fn cache_dir(&self) -> &Path;

    /// Best-effort request to drop caches after memory pressure.
    fn reclaim_memory(&self) {}
}
