//! Query execution.
//!
//! A read query runs its metrics one after another, formatting each into a
//! spool file on disk, then hands the finished file to any post-processing
//! plugins. The spool, the storage plan and the result groups are all owned
//! values that release themselves on drop, so an error at any step leaves
//! nothing behind.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use model::{
    DataFormatter, Datastore, DatastoreError, FormatterError, QueryDocument, QueryMetric,
    QueryParser, SpoolFile, SpoolWriter, TimeRange,
};
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;

use crate::config::LogQueriesConfig;
use crate::error::GatewayError;
use crate::telemetry::{QueryReport, RequestTelemetry, Telemetry, QUERY_TIME};

pub const QUERY_URL: &str = "/datapoints/query";

/// Hook applied to every parsed read query before plugins run.
pub trait QueryPreProcessor: Send + Sync {
    fn pre_process(&self, query: QueryDocument) -> QueryDocument;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPreProcessor;

impl QueryPreProcessor for IdentityPreProcessor {
    fn pre_process(&self, query: QueryDocument) -> QueryDocument {
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    MetricNames,
    TagKeys,
    TagValues,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NameKind::MetricNames => "metric names",
            NameKind::TagKeys => "tag names",
            NameKind::TagValues => "tag values",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub return_query_in_response: bool,
    pub log_queries: LogQueriesConfig,
    /// Wait before asking storage to reclaim memory after a read query hit
    /// memory pressure.
    pub memory_pause: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            return_query_in_response: false,
            log_queries: LogQueriesConfig::default(),
            memory_pause: Duration::from_secs(1),
        }
    }
}

pub struct QueryEngine {
    datastore: Arc<dyn Datastore>,
    parser: Arc<dyn QueryParser>,
    formatter: Arc<dyn DataFormatter>,
    pre_processor: Arc<dyn QueryPreProcessor>,
    telemetry: Arc<Telemetry>,
    settings: EngineSettings,
}

impl QueryEngine {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        parser: Arc<dyn QueryParser>,
        formatter: Arc<dyn DataFormatter>,
        telemetry: Arc<Telemetry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            datastore,
            parser,
            formatter,
            pre_processor: Arc::new(IdentityPreProcessor),
            telemetry,
            settings,
        }
    }

    pub fn with_pre_processor(mut self, pre_processor: Arc<dyn QueryPreProcessor>) -> Self {
        self.pre_processor = pre_processor;
        self
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    // ----- Read queries ----- //

    /// Run a read query and return the spooled response.
    pub async fn run_query(
        &self,
        payload: Option<String>,
        client_address: &str,
    ) -> Result<SpoolFile, GatewayError> {
        let query_id = Uuid::new_v4();
        async move {
            let mut report = QueryReport::start(
                &self.telemetry,
                QUERY_URL,
                client_address,
                self.settings.log_queries,
            );
            if let Some(payload) = &payload {
                debug!(query = %payload, "running query");
                report.set_query_json(payload.as_str());
            }

            let result = self.execute_query(payload, report.scope()).await;
            match result {
                Ok(spool) => {
                    report.succeeded();
                    Ok(spool)
                }
                Err(e) => Err(self.after_failure(e, true).await),
            }
        }
        .instrument(info_span!("query", %query_id))
        .await
    }

    async fn execute_query(
        &self,
        payload: Option<String>,
        scope: &mut RequestTelemetry,
    ) -> Result<SpoolFile, GatewayError> {
        let payload = require_payload(payload)?;
        let document = self.prepare(&payload)?;

        let original = self
            .settings
            .return_query_in_response
            .then_some(payload.as_str());

        let mut writer = self.create_spool()?;
        self.formatter
            .begin(&mut writer, original)
            .map_err(|e| self.formatter_error(e))?;

        for (index, metric) in document.metrics.iter().enumerate() {
            scope.add_tag("metric_name", metric.name.as_str());
            scope.add_tag("query_index", (index + 1).to_string());

            let started = Instant::now();
            let mut query = self
                .datastore
                .create_query(metric)
                .await
                .map_err(datastore_error)?;
            let mut groups = query.execute().await.map_err(datastore_error)?;
            self.formatter
                .format_query(
                    &mut writer,
                    index,
                    &mut groups,
                    metric.exclude_tags,
                    Some(query.sample_size()),
                )
                .map_err(|e| self.formatter_error(e))?;
            drop(groups);
            drop(query);

            scope.add_sample(QUERY_TIME, millis(started.elapsed()));
        }

        self.formatter
            .end(&mut writer)
            .map_err(|e| self.formatter_error(e))?;
        let spool = writer.finish().map_err(|e| self.spool_error(e))?;

        self.post_process(&document, spool)
    }

    /// Tags of the series each metric matches, without their points.
    pub async fn query_tags(&self, payload: Option<String>) -> Result<SpoolFile, GatewayError> {
        match self.execute_tag_query(payload).await {
            Ok(spool) => Ok(spool),
            Err(e) => Err(self.after_failure(e, false).await),
        }
    }

    async fn execute_tag_query(&self, payload: Option<String>) -> Result<SpoolFile, GatewayError> {
        let payload = require_payload(payload)?;
        debug!(query = %payload, "running tag query");
        let document = self.prepare(&payload)?;

        let mut writer = self.create_spool()?;
        self.formatter
            .begin(&mut writer, None)
            .map_err(|e| self.formatter_error(e))?;

        for (index, metric) in document.metrics.iter().enumerate() {
            let mut groups = self
                .datastore
                .query_tags(metric)
                .await
                .map_err(datastore_error)?;
            self.formatter
                .format_query(&mut writer, index, &mut groups, false, None)
                .map_err(|e| self.formatter_error(e))?;
        }

        self.formatter
            .end(&mut writer)
            .map_err(|e| self.formatter_error(e))?;
        writer.finish().map_err(|e| self.spool_error(e))
    }

    // ----- Deletes and metadata ----- //

    /// Delete the data each metric of the document selects. Omitted time
    /// bounds cover the whole store.
    pub async fn delete(&self, payload: Option<String>) -> Result<(), GatewayError> {
        match self.execute_delete(payload).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.after_failure(e, false).await),
        }
    }

    async fn execute_delete(&self, payload: Option<String>) -> Result<(), GatewayError> {
        let payload = require_payload(payload)?;
        debug!(query = %payload, "running delete");
        let document = self.parser.parse_delete(&payload, self.full_range())?;
        for metric in &document.metrics {
            self.datastore.delete(metric).await.map_err(datastore_error)?;
        }
        Ok(())
    }

    /// Delete every point of one metric.
    pub async fn delete_metric(&self, name: &str) -> Result<(), GatewayError> {
        let range = self.full_range();
        let metric = QueryMetric::new(range.start, range.end, 0, name);
        self.datastore.delete(&metric).await.map_err(|e| {
            error!(error = %e, metric = name, "delete failed");
            GatewayError::Internal(e.to_string())
        })
    }

    /// Rebuild the tag index of one metric. Omitted bounds cover the whole
    /// store.
    pub async fn index(
        &self,
        metric: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<(), GatewayError> {
        let range = self.full_range();
        let metric = QueryMetric::new(
            start.unwrap_or(range.start),
            end.unwrap_or(range.end),
            0,
            metric,
        );
        self.datastore.index_tags(&metric).await.map_err(|e| {
            error!(error = %e, metric = %metric.name, "index failed");
            GatewayError::Internal(e.to_string())
        })
    }

    /// Render a flat list of names into an in-memory body. Name lists are
    /// not spooled.
    pub async fn list_names(
        &self,
        kind: NameKind,
        prefix: Option<&str>,
    ) -> Result<Vec<u8>, GatewayError> {
        let values = match kind {
            NameKind::MetricNames => self.datastore.metric_names(prefix).await,
            NameKind::TagKeys => self.datastore.tag_names().await,
            NameKind::TagValues => self.datastore.tag_values().await,
        }
        .map_err(|e| {
            error!(error = %e, "failed to get {kind}");
            GatewayError::Internal(e.to_string())
        })?;

        let mut out = Vec::new();
        self.formatter.format_values(&mut out, &values).map_err(|e| {
            error!(error = %e, "failed to format {kind}");
            GatewayError::Internal(e.to_string())
        })?;
        Ok(out)
    }

    // ----- Helpers ----- //

    fn full_range(&self) -> TimeRange {
        TimeRange::new(self.datastore.min_time_value(), self.datastore.max_time_value())
    }

    /// Parse, then apply the pre-processor and any pre-processing plugins
    /// in document order.
    fn prepare(&self, payload: &str) -> Result<QueryDocument, GatewayError> {
        let document = self.parser.parse_query(payload)?;
        let mut document = self.pre_processor.pre_process(document);
        for plugin in document.plugins.clone() {
            if let Some(pre) = plugin.as_pre_processor() {
                document = pre.pre_process(document);
            }
        }
        Ok(document)
    }

    fn post_process(
        &self,
        document: &QueryDocument,
        mut spool: SpoolFile,
    ) -> Result<SpoolFile, GatewayError> {
        for plugin in &document.plugins {
            if let Some(post) = plugin.as_post_processor() {
                spool = post.process_query_results(spool).map_err(|e| {
                    error!(error = %e, plugin = post.name(), "post-processing failed");
                    GatewayError::Internal(e.to_string())
                })?;
            }
        }
        Ok(spool)
    }

    fn create_spool(&self) -> Result<SpoolWriter, GatewayError> {
        SpoolWriter::create_in(self.datastore.cache_dir()).map_err(|e| self.spool_error(e))
    }

    fn spool_error(&self, e: std::io::Error) -> GatewayError {
        error!(
            error = %e,
            cache_dir = %self.datastore.cache_dir().display(),
            "failed to write spool file"
        );
        GatewayError::Internal(e.to_string())
    }

    fn formatter_error(&self, e: FormatterError) -> GatewayError {
        match e {
            FormatterError::MemoryExhausted(msg) => GatewayError::ResourceExhausted(msg),
            FormatterError::Io(e) => self.spool_error(e),
            FormatterError::Format(msg) => GatewayError::Internal(msg),
        }
    }

    /// Log a failed request and, after memory pressure, ask storage to
    /// reclaim memory. Read queries wait `memory_pause` first.
    async fn after_failure(&self, e: GatewayError, pause: bool) -> GatewayError {
        match &e {
            GatewayError::ResourceExhausted(_) => {
                error!(error = %e, "request failed");
                if pause {
                    tokio::time::sleep(self.settings.memory_pause).await;
                }
                self.datastore.reclaim_memory();
            }
            GatewayError::Internal(_) => error!(error = %e, "request failed"),
            _ => debug!(error = %e, "request rejected"),
        }
        e
    }
}

fn require_payload(payload: Option<String>) -> Result<String, GatewayError> {
    payload
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| {
            GatewayError::Validation(vec!["query json must not be null or empty".to_string()])
        })
}

fn datastore_error(e: DatastoreError) -> GatewayError {
    match e {
        DatastoreError::MemoryExhausted(msg) => GatewayError::ResourceExhausted(msg),
        other => GatewayError::Internal(other.to_string()),
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use model::{
        DataPoint, DataPointEvent, FailureMode, MemoryDatastore, PluginError,
        PostProcessingPlugin, PreProcessingPlugin, QueryPlugin, Tags,
    };
    use model::memory::CallCounts;
    use serde_json::Value;

    use crate::formatter::JsonFormatter;
    use crate::query_parser::{JsonQueryParser, PluginRegistry};
    use crate::telemetry::REQUEST_TIME;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryDatastore>,
        engine: QueryEngine,
    }

    fn fixture_with(registry: PluginRegistry, settings: EngineSettings) -> Fixture {
        fixture_parts(registry, settings, Arc::new(JsonFormatter::default()))
    }

    fn fixture_parts(
        registry: PluginRegistry,
        settings: EngineSettings,
        formatter: Arc<dyn DataFormatter>,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDatastore::new(dir.path()));
        for (metric, ts, value) in [("a", 1, 1), ("b", 2, 2), ("c", 3, 3)] {
            let mut tags = Tags::new();
            tags.insert("host".into(), "h1".into());
            store
                .publish(DataPointEvent {
                    metric_name: metric.into(),
                    tags,
                    point: DataPoint::new(ts, value as i64),
                    ttl_secs: 0,
                })
                .unwrap();
        }
        let telemetry = Arc::new(Telemetry::new("node-1", false, store.clone()));
        let engine = QueryEngine::new(
            store.clone(),
            Arc::new(JsonQueryParser::new(registry)),
            formatter,
            telemetry,
            settings,
        );
        Fixture {
            _dir: dir,
            store,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(PluginRegistry::new(), EngineSettings::default())
    }

    fn spool_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn read(spool: &SpoolFile) -> Value {
        serde_json::from_slice(&std::fs::read(spool.path()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn sub_queries_keep_document_order() {
        let f = fixture();
        let spool = f
            .engine
            .run_query(
                Some(r#"{"start_absolute":1,"metrics":[{"name":"c"},{"name":"a"},{"name":"b"}]}"#.into()),
                "127.0.0.1",
            )
            .await
            .unwrap();

        let value = read(&spool);
        let names: Vec<_> = value["queries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["results"][0]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        let path = spool.path().to_path_buf();
        drop(spool);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_payload_is_a_validation_error() {
        let f = fixture();
        let err = f.engine.run_query(Some("  ".into()), "x").await.unwrap_err();
        assert_eq!(err.messages(), vec!["query json must not be null or empty"]);
        assert_eq!(spool_count(f.store.cache_dir()), 0);
    }

    #[tokio::test]
    async fn failed_query_leaves_no_spool_and_reports_failure() {
        let f = fixture();
        f.store
            .set_failure(Some(FailureMode::Backend("disk on fire".into())));
        let err = f
            .engine
            .run_query(Some(r#"{"start_absolute":1,"metrics":[{"name":"a"}]}"#.into()), "x")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Internal(_)));
        assert_eq!(spool_count(f.store.cache_dir()), 0);

        let report = f
            .store
            .snapshot()
            .into_iter()
            .find(|e| e.metric_name == REQUEST_TIME)
            .unwrap();
        assert_eq!(report.tags.get("status").map(String::as_str), Some("failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_pressure_pauses_then_reclaims() {
        let f = fixture();
        f.store
            .set_failure(Some(FailureMode::MemoryExhausted("heap".into())));

        let started = tokio::time::Instant::now();
        let err = f
            .engine
            .run_query(Some(r#"{"start_absolute":1,"metrics":[{"name":"a"}]}"#.into()), "x")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ResourceExhausted(_)));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(CallCounts::get(&f.store.calls().reclaims), 1);
    }

    /// Formats like [`JsonFormatter`] but runs out of memory on the second
    /// sub-query.
    struct ExhaustedOnSecond(JsonFormatter);

    impl DataFormatter for ExhaustedOnSecond {
        fn begin(&self, out: &mut dyn std::io::Write, original: Option<&str>) -> Result<(), FormatterError> {
            self.0.begin(out, original)
        }

        fn format_query(
            &self,
            out: &mut dyn std::io::Write,
            index: usize,
            groups: &mut model::ResultGroups,
            exclude_tags: bool,
            sample_size: Option<u64>,
        ) -> Result<(), FormatterError> {
            if index == 1 {
                return Err(FormatterError::MemoryExhausted("heap".into()));
            }
            self.0.format_query(out, index, groups, exclude_tags, sample_size)
        }

        fn end(&self, out: &mut dyn std::io::Write) -> Result<(), FormatterError> {
            self.0.end(out)
        }

        fn format_values(&self, out: &mut dyn std::io::Write, values: &[String]) -> Result<(), FormatterError> {
            self.0.format_values(out, values)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_mid_response_releases_everything() {
        let f = fixture_parts(
            PluginRegistry::new(),
            EngineSettings::default(),
            Arc::new(ExhaustedOnSecond(JsonFormatter::default())),
        );

        let err = f
            .engine
            .run_query(
                Some(r#"{"start_absolute":1,"metrics":[{"name":"a"},{"name":"b"}]}"#.into()),
                "x",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ResourceExhausted(_)));
        assert_eq!(spool_count(f.store.cache_dir()), 0);
        let calls = f.store.calls();
        assert_eq!(CallCounts::get(&calls.closed_queries), 2);
        assert_eq!(CallCounts::get(&calls.closed_groups), 2);
        assert_eq!(CallCounts::get(&calls.reclaims), 1);
    }

    #[tokio::test]
    async fn query_time_is_tagged_per_metric() {
        let f = fixture();
        f.engine
            .run_query(
                Some(r#"{"start_absolute":1,"metrics":[{"name":"a"},{"name":"b"}]}"#.into()),
                "x",
            )
            .await
            .unwrap();

        let samples: Vec<_> = f
            .store
            .snapshot()
            .into_iter()
            .filter(|e| e.metric_name == QUERY_TIME)
            .map(|e| (e.tags["metric_name"].clone(), e.tags["query_index"].clone()))
            .collect();
        assert_eq!(
            samples,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    struct RenameTo(&'static str);

    impl PreProcessingPlugin for RenameTo {
        fn name(&self) -> &str {
            "rename"
        }

        fn pre_process(&self, mut query: QueryDocument) -> QueryDocument {
            for metric in &mut query.metrics {
                metric.name = self.0.to_string();
            }
            query
        }
    }

    struct Replace;

    impl PostProcessingPlugin for Replace {
        fn name(&self) -> &str {
            "replace"
        }

        fn process_query_results(&self, results: SpoolFile) -> Result<SpoolFile, PluginError> {
            use std::io::Write;
            let mut writer = results.sibling()?;
            writer.write_all(br#"{"replaced":true}"#)?;
            Ok(writer.finish()?)
        }
    }

    #[tokio::test]
    async fn plugins_run_in_order() {
        let mut registry = PluginRegistry::new();
        registry.register(QueryPlugin::PreProcessing(Arc::new(RenameTo("c"))));
        registry.register(QueryPlugin::PostProcessing(Arc::new(Replace)));
        let f = fixture_with(registry, EngineSettings::default());

        let spool = f
            .engine
            .run_query(
                Some(
                    r#"{"start_absolute":1,"metrics":[{"name":"a"}],"plugins":[{"name":"rename"},{"name":"replace"}]}"#
                        .into(),
                ),
                "x",
            )
            .await
            .unwrap();

        assert_eq!(read(&spool), serde_json::json!({"replaced": true}));
        assert_eq!(spool_count(f.store.cache_dir()), 1);

        let timed = f
            .store
            .snapshot()
            .into_iter()
            .find(|e| e.metric_name == QUERY_TIME)
            .unwrap();
        assert_eq!(timed.tags["metric_name"], "c");
    }

    struct RenameAll(&'static str);

    impl QueryPreProcessor for RenameAll {
        fn pre_process(&self, mut query: QueryDocument) -> QueryDocument {
            for metric in &mut query.metrics {
                metric.name = self.0.to_string();
            }
            query
        }
    }

    struct RenameFrom {
        from: &'static str,
        to: &'static str,
    }

    impl PreProcessingPlugin for RenameFrom {
        fn name(&self) -> &str {
            "rename-from"
        }

        fn pre_process(&self, mut query: QueryDocument) -> QueryDocument {
            for metric in query.metrics.iter_mut().filter(|m| m.name == self.from) {
                metric.name = self.to.to_string();
            }
            query
        }
    }

    #[tokio::test]
    async fn pre_processor_runs_before_plugins_and_execution() {
        let mut registry = PluginRegistry::new();
        registry.register(QueryPlugin::PreProcessing(Arc::new(RenameFrom { from: "b", to: "c" })));
        let mut f = fixture_with(registry, EngineSettings::default());
        f.engine = f.engine.with_pre_processor(Arc::new(RenameAll("b")));

        let plain = f
            .engine
            .run_query(Some(r#"{"start_absolute":1,"metrics":[{"name":"a"}]}"#.into()), "x")
            .await
            .unwrap();
        let value = read(&plain);
        let result = &value["queries"][0]["results"][0];
        assert_eq!(result["name"], "b");
        assert_eq!(result["values"], serde_json::json!([[2, 2]]));

        let chained = f
            .engine
            .run_query(
                Some(r#"{"start_absolute":1,"metrics":[{"name":"a"}],"plugins":[{"name":"rename-from"}]}"#.into()),
                "x",
            )
            .await
            .unwrap();
        let value = read(&chained);
        let result = &value["queries"][0]["results"][0];
        assert_eq!(result["name"], "c");
        assert_eq!(result["values"], serde_json::json!([[3, 3]]));
    }

    #[tokio::test]
    async fn original_query_is_echoed_when_enabled() {
        let settings = EngineSettings {
            return_query_in_response: true,
            ..EngineSettings::default()
        };
        let f = fixture_with(PluginRegistry::new(), settings);
        let spool = f
            .engine
            .run_query(Some(r#"{"start_absolute":1,"metrics":[{"name":"a"}]}"#.into()), "x")
            .await
            .unwrap();

        let value = read(&spool);
        assert_eq!(value["original_query"]["metrics"][0]["name"], "a");
        assert_eq!(value["queries"][0]["sample_size"], 1);
    }

    #[tokio::test]
    async fn tag_query_has_tags_but_no_points() {
        let f = fixture();
        let spool = f
            .engine
            .query_tags(Some(r#"{"start_absolute":1,"metrics":[{"name":"a"}]}"#.into()))
            .await
            .unwrap();

        let value = read(&spool);
        let result = &value["queries"][0]["results"][0];
        assert_eq!(result["tags"]["host"], serde_json::json!(["h1"]));
        assert_eq!(result["values"], serde_json::json!([]));
        assert!(value["queries"][0].get("sample_size").is_none());
    }

    #[tokio::test]
    async fn delete_and_index_cover_full_range_by_default() {
        let f = fixture();
        f.engine
            .delete(Some(r#"{"metrics":[{"name":"a"}]}"#.into()))
            .await
            .unwrap();
        f.engine.delete_metric("b").await.unwrap();
        f.engine.index("c", Some(5), None).await.unwrap();

        let deleted: Vec<_> = f.store.deleted().into_iter().map(|m| { let range = m.range(); (m.name, range) }).collect();
        let full = TimeRange::new(i64::MIN, i64::MAX);
        assert_eq!(deleted, vec![("a".to_string(), full), ("b".to_string(), full)]);
        assert_eq!(f.store.indexed()[0].range(), TimeRange::new(5, i64::MAX));
    }

    #[tokio::test]
    async fn names_are_listed_as_flat_json() {
        let f = fixture();
        let body = f.engine.list_names(NameKind::MetricNames, None).await.unwrap();
        assert_eq!(body, br#"{"results":["a","b","c"]}"#.to_vec());

        let body = f.engine.list_names(NameKind::TagValues, None).await.unwrap();
        assert_eq!(body, br#"{"results":["h1"]}"#.to_vec());
    }
}
