//! Data points and the series envelopes they travel in.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Tag key → value for a single series.
pub type Tags = BTreeMap<String, String>;

/// The value carried by a data point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataValue {
    Long(i64),
    Double(f64),
    Text(String),
}

impl DataValue {
    /// Numeric view of the value, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Long(v) => Some(*v as f64),
            DataValue::Double(v) => Some(*v),
            DataValue::Text(_) => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Long(v) => write!(f, "{v}"),
            DataValue::Double(v) => write!(f, "{v}"),
            DataValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Long(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Double(v)
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

/// A single timestamped value. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: DataValue,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: impl Into<DataValue>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// One data point addressed to a series, as handed to the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPointEvent {
    pub metric_name: String,
    pub tags: Tags,
    pub point: DataPoint,
    /// Time-to-live in seconds; `0` keeps the point forever.
    pub ttl_secs: u32,
}

/// A named series with its points, used for self-reported metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPointSet {
    pub name: String,
    pub tags: Tags,
    pub points: Vec<DataPoint>,
}

impl DataPointSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Tags::new(),
            points: Vec::new(),
        }
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn add_data_point(&mut self, point: DataPoint) {
        self.points.push(point);
    }

    /// Split the set into one storage event per point.
    pub fn into_events(self, ttl_secs: u32) -> impl Iterator<Item = DataPointEvent> {
        let DataPointSet { name, tags, points } = self;
        points.into_iter().map(move |point| DataPointEvent {
            metric_name: name.clone(),
            tags: tags.clone(),
            point,
            ttl_secs,
        })
    }
}
