//! In-process storage engine.
//!
//! Holds every published point in memory. Used by the binary when no
//! external engine is configured, and by tests, which read the call
//! accounting and inject failures.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::datapoint::{DataPoint, DataPointEvent, Tags};
use crate::datastore::{
    DataPointGroup, Datastore, DatastoreError, DatastoreQuery, GroupByResult, QueryHandle,
    ResultGroups,
};
use crate::query::{Order, QueryMetric};

// ------------------------------------------------------------------ //
//  Accounting                                                         //
// ------------------------------------------------------------------ //

/// Counts of calls made against a [`MemoryDatastore`].
#[derive(Debug, Default)]
pub struct CallCounts {
    pub publishes: AtomicUsize,
    pub queries: AtomicUsize,
    pub tag_queries: AtomicUsize,
    pub deletes: AtomicUsize,
    pub indexes: AtomicUsize,
    pub name_lookups: AtomicUsize,
    pub closed_queries: AtomicUsize,
    pub closed_groups: AtomicUsize,
    pub reclaims: AtomicUsize,
}

impl CallCounts {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }

    /// Calls that read, delete or index data (publishes excluded).
    pub fn storage_work(&self) -> usize {
        Self::get(&self.queries)
            + Self::get(&self.tag_queries)
            + Self::get(&self.deletes)
            + Self::get(&self.indexes)
            + Self::get(&self.name_lookups)
    }
}

/// Failure returned by every read, delete and index call while set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    Backend(String),
    MemoryExhausted(String),
}

impl FailureMode {
    fn to_error(&self) -> DatastoreError {
        match self {
            FailureMode::Backend(msg) => DatastoreError::Backend(msg.clone()),
            FailureMode::MemoryExhausted(msg) => DatastoreError::MemoryExhausted(msg.clone()),
        }
    }
}

// ------------------------------------------------------------------ //
//  Store                                                              //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone)]
struct StoredPoint {
    metric: String,
    tags: Tags,
    point: DataPoint,
    expires_at: Option<Instant>,
}

impl StoredPoint {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }

    fn matches(&self, metric: &QueryMetric) -> bool {
        self.metric == metric.name
            && metric.range().contains(self.point.timestamp)
            && metric.matches_tags(&self.tags)
    }
}

#[derive(Debug)]
pub struct MemoryDatastore {
    points: RwLock<Vec<StoredPoint>>,
    cache_dir: PathBuf,
    calls: Arc<CallCounts>,
    deleted: Mutex<Vec<QueryMetric>>,
    indexed: Mutex<Vec<QueryMetric>>,
    failure: Mutex<Option<FailureMode>>,
}

impl MemoryDatastore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            cache_dir: cache_dir.into(),
            calls: Arc::new(CallCounts::default()),
            deleted: Mutex::new(Vec::new()),
            indexed: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn set_failure(&self, failure: Option<FailureMode>) {
        *self.failure.lock() = failure;
    }

    /// Non-destructive snapshot of stored points as events.
    pub fn snapshot(&self) -> Vec<DataPointEvent> {
        self.points
            .read()
            .iter()
            .map(|p| DataPointEvent {
                metric_name: p.metric.clone(),
                tags: p.tags.clone(),
                point: p.point.clone(),
                ttl_secs: 0,
            })
            .collect()
    }

    /// Metrics passed to `delete`, in call order.
    pub fn deleted(&self) -> Vec<QueryMetric> {
        self.deleted.lock().clone()
    }

    /// Metrics passed to `index_tags`, in call order.
    pub fn indexed(&self) -> Vec<QueryMetric> {
        self.indexed.lock().clone()
    }

    fn check_failure(&self) -> Result<(), DatastoreError> {
        match self.failure.lock().as_ref() {
            Some(mode) => Err(mode.to_error()),
            None => Ok(()),
        }
    }

    fn matching(&self, metric: &QueryMetric) -> Vec<StoredPoint> {
        let now = Instant::now();
        self.points
            .read()
            .iter()
            .filter(|p| p.is_live(now) && p.matches(metric))
            .cloned()
            .collect()
    }

    fn distinct<F>(&self, f: F) -> Vec<String>
    where
        F: Fn(&StoredPoint) -> Vec<String>,
    {
        let now = Instant::now();
        let set: BTreeSet<String> = self
            .points
            .read()
            .iter()
            .filter(|p| p.is_live(now))
            .flat_map(f)
            .collect();
        set.into_iter().collect()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    fn publish(&self, event: DataPointEvent) -> Result<(), DatastoreError> {
        CallCounts::bump(&self.calls.publishes);
        let expires_at = (event.ttl_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(u64::from(event.ttl_secs)));
        self.points.write().push(StoredPoint {
            metric: event.metric_name,
            tags: event.tags,
            point: event.point,
            expires_at,
        });
        Ok(())
    }

    async fn create_query(&self, metric: &QueryMetric) -> Result<QueryHandle, DatastoreError> {
        CallCounts::bump(&self.calls.queries);
        self.check_failure()?;
        Ok(QueryHandle::new(Box::new(MemoryQuery {
            metric: metric.clone(),
            points: self.matching(metric),
            sample_size: 0,
            calls: Arc::clone(&self.calls),
        })))
    }

    async fn query_tags(&self, metric: &QueryMetric) -> Result<ResultGroups, DatastoreError> {
        CallCounts::bump(&self.calls.tag_queries);
        self.check_failure()?;
        let mut groups = group_points(metric, self.matching(metric), &self.calls);
        for group in &mut groups {
            group.points.clear();
        }
        Ok(into_result_groups(groups))
    }

    async fn delete(&self, metric: &QueryMetric) -> Result<(), DatastoreError> {
        CallCounts::bump(&self.calls.deletes);
        self.check_failure()?;
        self.deleted.lock().push(metric.clone());
        let mut points = self.points.write();
        let before = points.len();
        points.retain(|p| !p.matches(metric));
        debug!(metric = %metric.name, removed = before - points.len(), "deleted points");
        Ok(())
    }

    async fn index_tags(&self, metric: &QueryMetric) -> Result<(), DatastoreError> {
        CallCounts::bump(&self.calls.indexes);
        self.check_failure()?;
        self.indexed.lock().push(metric.clone());
        Ok(())
    }

    async fn metric_names(&self, prefix: Option<&str>) -> Result<Vec<String>, DatastoreError> {
        CallCounts::bump(&self.calls.name_lookups);
        self.check_failure()?;
        let prefix = prefix.unwrap_or("");
        Ok(self.distinct(|p| {
            if p.metric.starts_with(prefix) {
                vec![p.metric.clone()]
            } else {
                Vec::new()
            }
        }))
    }

    async fn tag_names(&self) -> Result<Vec<String>, DatastoreError> {
        CallCounts::bump(&self.calls.name_lookups);
        self.check_failure()?;
        Ok(self.distinct(|p| p.tags.keys().cloned().collect()))
    }

    async fn tag_values(&self) -> Result<Vec<String>, DatastoreError> {
        CallCounts::bump(&self.calls.name_lookups);
        self.check_failure()?;
        Ok(self.distinct(|p| p.tags.values().cloned().collect()))
    }

    fn min_time_value(&self) -> i64 {
        i64::MIN
    }

    fn max_time_value(&self) -> i64 {
        i64::MAX
    }

    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn reclaim_memory(&self) {
        CallCounts::bump(&self.calls.reclaims);
        self.points.write().shrink_to_fit();
    }
}

// ------------------------------------------------------------------ //
//  Query execution                                                    //
// ------------------------------------------------------------------ //

struct MemoryQuery {
    metric: QueryMetric,
    points: Vec<StoredPoint>,
    sample_size: u64,
    calls: Arc<CallCounts>,
}

#[async_trait]
impl DatastoreQuery for MemoryQuery {
    async fn execute(&mut self) -> Result<ResultGroups, DatastoreError> {
        self.sample_size = self.points.len() as u64;
        let points = std::mem::take(&mut self.points);
        Ok(into_result_groups(group_points(
            &self.metric,
            points,
            &self.calls,
        )))
    }

    fn sample_size(&self) -> u64 {
        self.sample_size
    }

    fn close(&mut self) {
        self.points.clear();
        CallCounts::bump(&self.calls.closed_queries);
    }
}

struct MemoryGroup {
    name: String,
    tags: BTreeMap<String, BTreeSet<String>>,
    group_by: Vec<GroupByResult>,
    points: VecDeque<DataPoint>,
    calls: Arc<CallCounts>,
    closed: bool,
}

impl DataPointGroup for MemoryGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.tags
    }

    fn group_by(&self) -> &[GroupByResult] {
        &self.group_by
    }

    fn next_point(&mut self) -> Option<DataPoint> {
        self.points.pop_front()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.points.clear();
            CallCounts::bump(&self.calls.closed_groups);
        }
    }
}

fn into_result_groups(groups: Vec<MemoryGroup>) -> ResultGroups {
    ResultGroups::new(
        groups
            .into_iter()
            .map(|g| Box::new(g) as Box<dyn DataPointGroup>)
            .collect(),
    )
}

/// Split matching points into groups keyed by the requested group-by tags.
/// A query with no matches still yields one empty group for the metric.
fn group_points(
    metric: &QueryMetric,
    points: Vec<StoredPoint>,
    calls: &Arc<CallCounts>,
) -> Vec<MemoryGroup> {
    let mut buckets: BTreeMap<Vec<Option<String>>, Vec<StoredPoint>> = BTreeMap::new();
    for point in points {
        let key = metric
            .group_by_tags
            .iter()
            .map(|tag| point.tags.get(tag).cloned())
            .collect();
        buckets.entry(key).or_default().push(point);
    }

    if buckets.is_empty() {
        buckets.insert(Vec::new(), Vec::new());
    }

    buckets
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by_key(|p| p.point.timestamp);
            if metric.order == Order::Desc {
                members.reverse();
            }
            if let Some(limit) = metric.limit {
                members.truncate(limit);
            }

            let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for member in &members {
                for (k, v) in &member.tags {
                    tags.entry(k.clone()).or_default().insert(v.clone());
                }
            }

            let group_by = if metric.group_by_tags.is_empty() {
                Vec::new()
            } else {
                vec![GroupByResult {
                    name: "tag".to_string(),
                    tags: metric.group_by_tags.clone(),
                    group: metric
                        .group_by_tags
                        .iter()
                        .zip(key)
                        .filter_map(|(tag, value)| value.map(|v| (tag.clone(), v)))
                        .collect(),
                }]
            };

            MemoryGroup {
                name: metric.name.clone(),
                tags,
                group_by,
                points: members.into_iter().map(|m| m.point).collect(),
                calls: Arc::clone(calls),
                closed: false,
            }
        })
        .collect()
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //
