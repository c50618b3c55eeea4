//! Parsed query documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::plugin::QueryPlugin;

/// Inclusive time range in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// One named metric with its range, filters and grouping; the unit of
/// query execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetric {
    pub name: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Tag key → accepted values. A series matches when every key matches
    /// one of its values.
    pub tags: BTreeMap<String, BTreeSet<String>>,
    /// Tag keys to group results by; empty yields a single group.
    pub group_by_tags: Vec<String>,
    pub exclude_tags: bool,
    pub limit: Option<usize>,
    pub order: Order,
    pub cache_time: u32,
}

impl QueryMetric {
    pub fn new(start_time: i64, end_time: i64, cache_time: u32, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time,
            end_time,
            tags: BTreeMap::new(),
            group_by_tags: Vec::new(),
            exclude_tags: false,
            limit: None,
            order: Order::Asc,
            cache_time,
        }
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(key.into()).or_default().insert(value.into());
        self
    }

    /// Whether a series with `tags` passes this metric's tag filter.
    pub fn matches_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        self.tags.iter().all(|(key, accepted)| {
            tags.get(key)
                .map(|value| accepted.is_empty() || accepted.contains(value))
                .unwrap_or(false)
        })
    }
}

/// A client query after parsing: metrics and plugins, both in request order.
#[derive(Debug, Clone, Default)]
pub struct QueryDocument {
    pub metrics: Vec<QueryMetric>,
    pub plugins: Vec<QueryPlugin>,
    pub cache_time: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let metric = QueryMetric::new(0, 10, 0, "cpu");
        assert!(metric.matches_tags(&tags(&[("host", "a")])));
        assert!(metric.matches_tags(&tags(&[])));
    }

    #[test]
    fn filter_requires_every_key() {
        let metric = QueryMetric::new(0, 10, 0, "cpu")
            .with_tag("host", "a")
            .with_tag("host", "b")
            .with_tag("dc", "east");
        assert!(metric.matches_tags(&tags(&[("host", "b"), ("dc", "east")])));
        assert!(!metric.matches_tags(&tags(&[("host", "c"), ("dc", "east")])));
        assert!(!metric.matches_tags(&tags(&[("host", "a")])));
    }

    #[test]
    fn range_is_inclusive() {
        let range = TimeRange::new(5, 10);
        assert!(range.contains(5));
        assert!(range.contains(10));
        assert!(!range.contains(11));
    }
}
