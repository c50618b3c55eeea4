//! JSON query documents.
//!
//! ```json
//! {
//!   "start_relative": {"value": 1, "unit": "hours"},
//!   "cache_time": 0,
//!   "metrics": [
//!     {"name": "cpu", "tags": {"host": ["a", "b"]}, "group_by": [{"name": "tag", "tags": ["host"]}],
//!      "limit": 100, "order": "desc", "exclude_tags": false}
//!   ],
//!   "plugins": [{"name": "rollup_export"}]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Months, Utc};
use model::{Order, ParseError, QueryDocument, QueryMetric, QueryParser, QueryPlugin, TimeRange};
use serde::Deserialize;
use serde_json::error::Category;

/// Plugins a query may name, resolved at parse time.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, QueryPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: QueryPlugin) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn resolve(&self, name: &str) -> Option<QueryPlugin> {
        self.plugins.get(name).cloned()
    }
}

// ------------------------------------------------------------------ //
//  Wire shapes                                                        //
// ------------------------------------------------------------------ //

#[derive(Debug, Deserialize)]
struct QueryJson {
    start_absolute: Option<i64>,
    start_relative: Option<RelativeTime>,
    end_absolute: Option<i64>,
    end_relative: Option<RelativeTime>,
    #[serde(default)]
    cache_time: u32,
    #[serde(default)]
    metrics: Vec<MetricJson>,
    #[serde(default)]
    plugins: Vec<PluginJson>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RelativeTime {
    value: u32,
    unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

#[derive(Debug, Deserialize)]
struct MetricJson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, TagValues>,
    #[serde(default)]
    group_by: Vec<GroupByJson>,
    #[serde(default)]
    exclude_tags: bool,
    limit: Option<usize>,
    #[serde(default)]
    order: Order,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagValues {
    One(String),
    Many(Vec<String>),
}

impl TagValues {
    fn into_set(self) -> BTreeSet<String> {
        match self {
            TagValues::One(v) => BTreeSet::from([v]),
            TagValues::Many(vs) => vs.into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupByJson {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PluginJson {
    name: String,
}

// ------------------------------------------------------------------ //
//  Parser                                                             //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Copy)]
enum Bounds {
    /// Start required, end defaults to now.
    Read,
    /// Missing bounds fall back to the given range.
    Delete(TimeRange),
}

#[derive(Debug, Clone, Default)]
pub struct JsonQueryParser {
    plugins: PluginRegistry,
}

impl JsonQueryParser {
    pub fn new(plugins: PluginRegistry) -> Self {
        Self { plugins }
    }

    fn parse(&self, text: &str, bounds: Bounds, now: DateTime<Utc>) -> Result<QueryDocument, ParseError> {
        let query: QueryJson = serde_json::from_str(text).map_err(|e| match e.classify() {
            Category::Syntax | Category::Eof | Category::Io => ParseError::Syntax(e.to_string()),
            Category::Data => ParseError::Query(e.to_string()),
        })?;

        let mut violations = Vec::new();

        let start = absolute_or_relative(query.start_absolute, query.start_relative, now);
        let end = absolute_or_relative(query.end_absolute, query.end_relative, now);
        let (start, end) = match bounds {
            Bounds::Read => (start, Some(end.unwrap_or_else(|| now.timestamp_millis()))),
            Bounds::Delete(full) => (Some(start.unwrap_or(full.start)), Some(end.unwrap_or(full.end))),
        };

        match (start, end) {
            (None, _) => violations.push(
                "query.start_absolute or query.start_relative must be set".to_string(),
            ),
            (Some(start), Some(end)) if start > end => violations.push(
                "query.start_time must be less than or equal to query.end_time".to_string(),
            ),
            _ => {}
        }

        if query.metrics.is_empty() {
            violations.push("query.metric[] must have a size of at least 1".to_string());
        }
        for (i, metric) in query.metrics.iter().enumerate() {
            if metric.name.is_empty() {
                violations.push(format!("query.metric[{i}].name may not be empty"));
            }
            if metric.limit == Some(0) {
                violations.push(format!(
                    "query.metric[{i}].limit must be greater than or equal to 1"
                ));
            }
        }

        let (Some(start), Some(end)) = (start, end) else {
            return Err(ParseError::Validation(violations));
        };
        if !violations.is_empty() {
            return Err(ParseError::Validation(violations));
        }

        let metrics = query
            .metrics
            .into_iter()
            .map(|metric| build_metric(metric, start, end, query.cache_time))
            .collect::<Result<Vec<_>, _>>()?;

        let plugins = query
            .plugins
            .into_iter()
            .map(|p| {
                self.plugins
                    .resolve(&p.name)
                    .ok_or_else(|| ParseError::Query(format!("unknown plugin: {}", p.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryDocument {
            metrics,
            plugins,
            cache_time: query.cache_time,
        })
    }
}

impl QueryParser for JsonQueryParser {
    fn parse_query(&self, text: &str) -> Result<QueryDocument, ParseError> {
        self.parse(text, Bounds::Read, Utc::now())
    }

    fn parse_delete(&self, text: &str, full_range: TimeRange) -> Result<QueryDocument, ParseError> {
        self.parse(text, Bounds::Delete(full_range), Utc::now())
    }
}

fn build_metric(metric: MetricJson, start: i64, end: i64, cache_time: u32) -> Result<QueryMetric, ParseError> {
    let mut query = QueryMetric::new(start, end, cache_time, metric.name);
    query.tags = metric
        .tags
        .into_iter()
        .map(|(k, v)| (k, v.into_set()))
        .collect();
    query.exclude_tags = metric.exclude_tags;
    query.limit = metric.limit;
    query.order = metric.order;

    for group_by in metric.group_by {
        if group_by.name != "tag" {
            return Err(ParseError::Query(format!(
                "unsupported group_by type: {}",
                group_by.name
            )));
        }
        for tag in group_by.tags {
            if !query.group_by_tags.contains(&tag) {
                query.group_by_tags.push(tag);
            }
        }
    }

    Ok(query)
}

fn absolute_or_relative(
    absolute: Option<i64>,
    relative: Option<RelativeTime>,
    now: DateTime<Utc>,
) -> Option<i64> {
    absolute.or_else(|| relative.map(|r| r.before(now)))
}

impl RelativeTime {
    /// The instant `self` before `now`, in Unix milliseconds.
    fn before(self, now: DateTime<Utc>) -> i64 {
        let n = i64::from(self.value);
        let shifted = match self.unit {
            TimeUnit::Milliseconds => now.checked_sub_signed(Duration::milliseconds(n)),
            TimeUnit::Seconds => now.checked_sub_signed(Duration::seconds(n)),
            TimeUnit::Minutes => now.checked_sub_signed(Duration::minutes(n)),
            TimeUnit::Hours => now.checked_sub_signed(Duration::hours(n)),
            TimeUnit::Days => now.checked_sub_signed(Duration::days(n)),
            TimeUnit::Weeks => now.checked_sub_signed(Duration::weeks(n)),
            TimeUnit::Months => now.checked_sub_months(Months::new(self.value)),
            TimeUnit::Years => self
                .value
                .checked_mul(12)
                .and_then(|months| now.checked_sub_months(Months::new(months))),
        };
        shifted.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN)
    }
}
