//! Self-reporting: per-request timing, ingest rate counters and the
//! aggregated statistics drained by the reporting loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use model::{DataPoint, DataPointEvent, DataPointSet, DataValue, Datastore, Tags};
use parking_lot::Mutex;
use tracing::warn;

use crate::config::LogQueriesConfig;

pub const QUERY_TIME: &str = "tsgate.http.query_time";
pub const REQUEST_TIME: &str = "tsgate.http.request_time";
pub const INGEST_COUNT: &str = "tsgate.http.ingest_count";
pub const INGEST_TIME: &str = "tsgate.http.ingest_time";
pub const LOG_QUERY_REMOTE_ADDRESS: &str = "tsgate.log.query.remote_address";
pub const LOG_QUERY_JSON: &str = "tsgate.log.query.json";

// ------------------------------------------------------------------ //
//  Process-wide accumulators                                          //
// ------------------------------------------------------------------ //

/// Data points ingested and time spent ingesting them since the last
/// report.
#[derive(Debug, Default)]
pub struct IngestCounters {
    data_points: AtomicU64,
    ingest_micros: AtomicU64,
}

impl IngestCounters {
    pub fn record(&self, data_points: u64, micros: u64) {
        self.data_points.fetch_add(data_points, Ordering::Relaxed);
        self.ingest_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Current totals, without resetting.
    pub fn peek(&self) -> (u64, u64) {
        (
            self.data_points.load(Ordering::Relaxed),
            self.ingest_micros.load(Ordering::Relaxed),
        )
    }

    /// Take both totals and reset them to zero.
    pub fn drain(&self) -> (u64, u64) {
        (
            self.data_points.swap(0, Ordering::Relaxed),
            self.ingest_micros.swap(0, Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsData {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
}

impl StatsData {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn add(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    pub fn avg(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Per-metric running statistics for aggregated reporting.
#[derive(Debug, Default)]
pub struct StatsMap {
    inner: Mutex<BTreeMap<String, StatsData>>,
}

impl StatsMap {
    pub fn add_value(&self, metric: &str, value: f64) {
        let mut inner = self.inner.lock();
        match inner.get_mut(metric) {
            Some(stats) => stats.add(value),
            None => {
                inner.insert(metric.to_string(), StatsData::new(value));
            }
        }
    }

    /// Take everything accumulated so far, leaving the map empty.
    pub fn drain(&self) -> BTreeMap<String, StatsData> {
        std::mem::take(&mut *self.inner.lock())
    }
}

// ------------------------------------------------------------------ //
//  Per-request scope                                                  //
// ------------------------------------------------------------------ //

/// One recorded value with the tags in effect when it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub tags: Tags,
    pub value: DataValue,
    pub ttl_secs: u32,
}

/// Timing and tag facts collected while serving one request.
#[derive(Debug)]
pub struct RequestTelemetry {
    started: Instant,
    report_time: i64,
    tags: Tags,
    samples: Vec<Sample>,
}

impl RequestTelemetry {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            report_time: chrono::Utc::now().timestamp_millis(),
            tags: Tags::new(),
            samples: Vec::new(),
        }
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn clear_tags(&mut self) {
        self.tags.clear();
    }

    pub fn add_sample(&mut self, metric: &str, value: impl Into<DataValue>) {
        self.add_sample_with_ttl(metric, value, 0);
    }

    pub fn add_sample_with_ttl(&mut self, metric: &str, value: impl Into<DataValue>, ttl_secs: u32) {
        self.samples.push(Sample {
            metric: metric.to_string(),
            tags: self.tags.clone(),
            value: value.into(),
            ttl_secs,
        });
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

// ------------------------------------------------------------------ //
//  Telemetry                                                          //
// ------------------------------------------------------------------ //

pub struct Telemetry {
    hostname: String,
    aggregate: bool,
    counters: IngestCounters,
    stats: StatsMap,
    datastore: Arc<dyn Datastore>,
}

impl Telemetry {
    pub fn new(hostname: impl Into<String>, aggregate: bool, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            hostname: hostname.into(),
            aggregate,
            counters: IngestCounters::default(),
            stats: StatsMap::default(),
            datastore,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn counters(&self) -> &IngestCounters {
        &self.counters
    }

    pub fn stats(&self) -> &StatsMap {
        &self.stats
    }

    /// Hand a finished request scope off, consuming it.
    ///
    /// In aggregated mode numeric samples go to the stats map; text samples
    /// (slow-query records) are always published as they cannot be
    /// aggregated.
    pub fn flush(&self, scope: RequestTelemetry) {
        let report_time = scope.report_time;
        for sample in scope.samples {
            match (self.aggregate, sample.value.as_f64()) {
                (true, Some(value)) => self.stats.add_value(&sample.metric, value),
                _ => self.publish(DataPointEvent {
                    metric_name: sample.metric,
                    tags: sample.tags,
                    point: DataPoint::new(report_time, sample.value),
                    ttl_secs: sample.ttl_secs,
                }),
            }
        }
    }

    /// Drain the ingest counters and the stats map into reportable sets.
    pub fn collect_self_metrics(&self, now: i64) -> Vec<DataPointSet> {
        let mut sets = Vec::new();

        let (count, micros) = self.counters.drain();
        if count != 0 {
            sets.push(self.single(INGEST_COUNT, now, DataValue::Long(saturating_i64(count))));
            sets.push(self.single(INGEST_TIME, now, DataValue::Long(saturating_i64(micros))));
        }

        for (metric, stats) in self.stats.drain() {
            let values = [
                ("min", DataValue::Double(stats.min)),
                ("max", DataValue::Double(stats.max)),
                ("avg", DataValue::Double(stats.avg())),
                ("count", DataValue::Long(saturating_i64(stats.count))),
                ("sum", DataValue::Double(stats.sum)),
            ];
            for (suffix, value) in values {
                sets.push(self.single(&format!("{metric}.{suffix}"), now, value));
            }
        }

        sets
    }

    pub fn publish_sets(&self, sets: Vec<DataPointSet>) {
        for set in sets {
            for event in set.into_events(0) {
                self.publish(event);
            }
        }
    }

    fn single(&self, name: &str, now: i64, value: DataValue) -> DataPointSet {
        let mut set = DataPointSet::new(name);
        set.add_tag("host", self.hostname.as_str());
        set.add_data_point(DataPoint::new(now, value));
        set
    }

    fn publish(&self, event: DataPointEvent) {
        let metric = event.metric_name.clone();
        if let Err(e) = self.datastore.publish(event) {
            warn!(error = %e, metric, "failed to publish self-reported metric");
        }
    }
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ------------------------------------------------------------------ //
//  Query report guard                                                 //
// ------------------------------------------------------------------ //

/// Owns the telemetry scope of one query request and reports it when
/// dropped, whether the request succeeded, failed or panicked.
pub struct QueryReport<'a> {
    telemetry: &'a Telemetry,
    scope: Option<RequestTelemetry>,
    request: &'static str,
    remote_addr: String,
    query_json: Option<String>,
    log_queries: LogQueriesConfig,
    succeeded: bool,
}

impl<'a> QueryReport<'a> {
    pub fn start(
        telemetry: &'a Telemetry,
        request: &'static str,
        remote_addr: impl Into<String>,
        log_queries: LogQueriesConfig,
    ) -> Self {
        let mut scope = RequestTelemetry::start();
        scope.add_tag("host", telemetry.hostname());
        Self {
            telemetry,
            scope: Some(scope),
            request,
            remote_addr: remote_addr.into(),
            query_json: None,
            log_queries,
            succeeded: false,
        }
    }

    pub fn scope(&mut self) -> &mut RequestTelemetry {
        self.scope.get_or_insert_with(RequestTelemetry::start)
    }

    /// Keep the query text for the slow-query log.
    pub fn set_query_json(&mut self, json: impl Into<String>) {
        if self.log_queries.enable {
            self.query_json = Some(json.into());
        }
    }

    pub fn succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for QueryReport<'_> {
    fn drop(&mut self) {
        let Some(mut scope) = self.scope.take() else {
            return;
        };

        scope.clear_tags();
        scope.add_tag("host", self.telemetry.hostname());
        scope.add_tag("status", if self.succeeded { "success" } else { "failed" });

        let elapsed = scope.elapsed();
        let log = self.log_queries;
        if log.enable && elapsed.as_secs() >= log.greater_than_secs {
            scope.add_sample_with_ttl(
                LOG_QUERY_REMOTE_ADDRESS,
                self.remote_addr.clone(),
                log.ttl_secs,
            );
            if let Some(json) = self.query_json.take() {
                scope.add_sample_with_ttl(LOG_QUERY_JSON, json, log.ttl_secs);
            }
        }

        scope.add_tag("request", self.request);
        scope.add_sample(REQUEST_TIME, duration_millis(elapsed));

        self.telemetry.flush(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::MemoryDatastore;

    fn telemetry(aggregate: bool) -> (Arc<MemoryDatastore>, Telemetry) {
        let store = Arc::new(MemoryDatastore::new(std::env::temp_dir()));
        let telemetry = Telemetry::new("node-1", aggregate, store.clone());
        (store, telemetry)
    }

    fn value_of<'a>(sets: &'a [DataPointSet], name: &str) -> &'a DataValue {
        &sets
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("missing {name}"))
            .points[0]
            .value
    }

    #[test]
    fn counters_drain_and_reset() {
        let counters = IngestCounters::default();
        counters.record(3, 100);
        counters.record(2, 50);
        assert_eq!(counters.drain(), (5, 150));
        assert_eq!(counters.drain(), (0, 0));
    }

    #[test]
    fn request_time_saturates_instead_of_wrapping() {
        assert_eq!(duration_millis(Duration::from_micros(1_500_999)), 1_500);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
    }

    #[test]
    fn concurrent_writers_and_drains_lose_nothing() {
        const WRITERS: u64 = 8;
        const WRITES: u64 = 10_000;

        let stats = &StatsMap::default();
        let counters = &IngestCounters::default();
        let mut stats_total = 0u64;
        let mut counted = (0u64, 0u64);

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|_| {
                    s.spawn(move || {
                        for _ in 0..WRITES {
                            stats.add_value(REQUEST_TIME, 1.0);
                            counters.record(1, 2);
                        }
                    })
                })
                .collect();

            while !handles.iter().all(|h| h.is_finished()) {
                stats_total += stats.drain().values().map(|d| d.count).sum::<u64>();
                let (points, micros) = counters.drain();
                counted = (counted.0 + points, counted.1 + micros);
            }
        });

        stats_total += stats.drain().values().map(|d| d.count).sum::<u64>();
        let (points, micros) = counters.drain();
        counted = (counted.0 + points, counted.1 + micros);

        assert_eq!(stats_total, WRITERS * WRITES);
        assert_eq!(counted, (WRITERS * WRITES, 2 * WRITERS * WRITES));
    }

    #[test]
    fn aggregated_samples_report_stats_once() {
        let (store, telemetry) = telemetry(true);
        for _ in 0..4 {
            let mut scope = RequestTelemetry::start();
            scope.add_sample(REQUEST_TIME, 25_i64);
            telemetry.flush(scope);
        }
        assert_eq!(store.snapshot().len(), 0);

        let sets = telemetry.collect_self_metrics(1_000);
        assert_eq!(value_of(&sets, "tsgate.http.request_time.count"), &DataValue::Long(4));
        assert_eq!(value_of(&sets, "tsgate.http.request_time.sum"), &DataValue::Double(100.0));
        assert_eq!(value_of(&sets, "tsgate.http.request_time.avg"), &DataValue::Double(25.0));
        assert!(sets.iter().all(|s| s.tags.get("host").map(String::as_str) == Some("node-1")));

        assert!(telemetry.collect_self_metrics(2_000).is_empty());
    }

    #[test]
    fn ingest_metrics_only_reported_when_nonzero() {
        let (_, telemetry) = telemetry(false);
        assert!(telemetry.collect_self_metrics(1).is_empty());

        telemetry.counters().record(7, 900);
        let sets = telemetry.collect_self_metrics(1);
        assert_eq!(value_of(&sets, INGEST_COUNT), &DataValue::Long(7));
        assert_eq!(value_of(&sets, INGEST_TIME), &DataValue::Long(900));
    }

    #[test]
    fn direct_mode_publishes_with_sample_tags() {
        let (store, telemetry) = telemetry(false);
        let mut scope = RequestTelemetry::start();
        scope.add_tag("metric_name", "cpu");
        scope.add_sample(QUERY_TIME, 12_i64);
        scope.clear_tags();
        scope.add_sample(REQUEST_TIME, 15_i64);
        telemetry.flush(scope);

        let events = store.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tags.get("metric_name").map(String::as_str), Some("cpu"));
        assert!(events[1].tags.is_empty());
    }

    #[test]
    fn report_guard_flushes_failure_on_drop() {
        let (store, telemetry) = telemetry(false);
        {
            let mut report =
                QueryReport::start(&telemetry, "/datapoints/query", "10.0.0.1", LogQueriesConfig::default());
            report.scope().add_tag("metric_name", "cpu");
        }

        let events = store.snapshot();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.metric_name, REQUEST_TIME);
        assert_eq!(event.tags.get("status").map(String::as_str), Some("failed"));
        assert_eq!(event.tags.get("request").map(String::as_str), Some("/datapoints/query"));
        assert!(!event.tags.contains_key("metric_name"));
    }

    #[test]
    fn slow_queries_are_logged_with_ttl() {
        let (store, telemetry) = telemetry(false);
        let log = LogQueriesConfig {
            enable: true,
            ttl_secs: 60,
            greater_than_secs: 0,
        };
        {
            let mut report = QueryReport::start(&telemetry, "/datapoints/query", "10.0.0.1", log);
            report.set_query_json(r#"{"metrics":[]}"#);
            report.succeeded();
        }

        let events = store.snapshot();
        let names: Vec<_> = events.iter().map(|e| e.metric_name.as_str()).collect();
        assert_eq!(names, vec![LOG_QUERY_REMOTE_ADDRESS, LOG_QUERY_JSON, REQUEST_TIME]);
        assert_eq!(events[0].point.value, DataValue::Text("10.0.0.1".into()));
        assert_eq!(events[2].tags.get("status").map(String::as_str), Some("success"));
    }
}
