//! Data-point ingestion.
//!
//! The request body is decoded as a stream of metric records. Every valid
//! point is published as soon as its record is decoded; malformed records
//! are reported as validation messages without stopping the decode.
//!
//! Accepted record shapes:
//!
//! ```json
//! {"name": "cpu", "tags": {"host": "a"}, "timestamp": 1700000000000, "value": 1.5}
//! {"name": "cpu", "tags": {"host": "a"}, "ttl": 3600, "datapoints": [[1700000000000, 3], [1700000001000, 4]]}
//! ```
//!
//! The body holds one record or an array of them.

use std::fmt;
use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use flate2::read::MultiGzDecoder;
use futures::TryStreamExt;
use model::{DataPoint, DataPointEvent, DataValue, Datastore, DatastoreError, Tags};
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, error};

use crate::error::GatewayError;
use crate::telemetry::IngestCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Identity,
    Gzip,
}

impl Compression {
    /// `Content-Encoding: gzip`, or the older `Content-Type: application/gzip`.
    pub fn from_headers(
        content_encoding: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<Self, GatewayError> {
        let encoding = content_encoding.map(|v| v.trim().to_ascii_lowercase());
        match encoding.as_deref() {
            None | Some("") | Some("identity") => {}
            Some("gzip") | Some("x-gzip") => return Ok(Compression::Gzip),
            Some(other) => {
                return Err(GatewayError::MalformedInput(format!(
                    "unsupported content encoding: {other}"
                )))
            }
        }

        let gzip_alias = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|mime| mime.trim().eq_ignore_ascii_case("application/gzip"))
            .unwrap_or(false);
        Ok(if gzip_alias {
            Compression::Gzip
        } else {
            Compression::Identity
        })
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Syntax(String),
    #[error("failed to read request body: {0}")]
    Read(io::Error),
    #[error("failed to publish data point: {0}")]
    Publish(#[from] DatastoreError),
    #[error("ingest worker failed: {0}")]
    Worker(String),
}

impl From<IngestError> for GatewayError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Syntax(msg) => GatewayError::Syntax(msg),
            IngestError::Read(_) => GatewayError::MalformedInput(e.to_string()),
            IngestError::Publish(_) | IngestError::Worker(_) => {
                GatewayError::Internal(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Data points published.
    pub record_count: u64,
    pub elapsed_micros: u64,
    pub errors: Vec<String>,
}

// ------------------------------------------------------------------ //
//  Entry points                                                       //
// ------------------------------------------------------------------ //

/// Decode `body` on a blocking worker, publishing as records arrive, and
/// credit the published points to `counters`.
pub async fn ingest(
    body: Body,
    compression: Compression,
    datastore: Arc<dyn Datastore>,
    counters: &IngestCounters,
) -> Result<IngestOutcome, GatewayError> {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(stream));

    let joined = tokio::task::spawn_blocking(move || {
        decode_and_publish(reader, compression, datastore.as_ref())
    })
    .await;

    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            if matches!(e, IngestError::Publish(_)) {
                error!(error = %e, "failed to add metric");
            }
            return Err(e.into());
        }
        Err(e) => {
            error!(error = %e, "ingest worker aborted");
            return Err(IngestError::Worker(e.to_string()).into());
        }
    };

    counters.record(outcome.record_count, outcome.elapsed_micros);
    debug!(
        records = outcome.record_count,
        errors = outcome.errors.len(),
        micros = outcome.elapsed_micros,
        "ingested batch"
    );
    Ok(outcome)
}

/// Blocking decode of one request body.
pub fn decode_and_publish<R: Read>(
    reader: R,
    compression: Compression,
    datastore: &dyn Datastore,
) -> Result<IngestOutcome, IngestError> {
    let started = Instant::now();
    let mut batch = Batch::new(datastore);

    match compression {
        Compression::Identity => batch.decode(BufReader::new(reader))?,
        Compression::Gzip => batch.decode(BufReader::new(MultiGzDecoder::new(reader)))?,
    }

    Ok(IngestOutcome {
        record_count: batch.published,
        elapsed_micros: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        errors: batch.errors,
    })
}

// ------------------------------------------------------------------ //
//  Streaming decode                                                   //
// ------------------------------------------------------------------ //

struct Batch<'a> {
    datastore: &'a dyn Datastore,
    next_index: usize,
    published: u64,
    errors: Vec<String>,
    fatal: Option<DatastoreError>,
}

impl<'a> Batch<'a> {
    fn new(datastore: &'a dyn Datastore) -> Self {
        Self {
            datastore,
            next_index: 0,
            published: 0,
            errors: Vec::new(),
            fatal: None,
        }
    }

    fn decode<R: Read>(&mut self, reader: R) -> Result<(), IngestError> {
        let mut de = serde_json::Deserializer::from_reader(reader);
        let decoded = (&mut *self).deserialize(&mut de);

        if let Some(e) = self.fatal.take() {
            return Err(IngestError::Publish(e));
        }
        decoded.map_err(classify)?;
        de.end().map_err(classify)
    }

    fn accept(&mut self, record: Value) {
        let index = self.next_index;
        self.next_index += 1;

        let (events, errors) = parse_record(index, record);
        self.errors.extend(errors);
        for event in events {
            match self.datastore.publish(event) {
                Ok(()) => self.published += 1,
                Err(e) => {
                    self.fatal = Some(e);
                    return;
                }
            }
        }
    }
}

fn classify(e: serde_json::Error) -> IngestError {
    if e.is_io() {
        IngestError::Read(e.into())
    } else {
        IngestError::Syntax(e.to_string())
    }
}

impl<'de> DeserializeSeed<'de> for &mut Batch<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(BatchVisitor(self))
    }
}

struct BatchVisitor<'b, 'a>(&'b mut Batch<'a>);

impl<'de> Visitor<'de> for BatchVisitor<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a metric object or an array of metric objects")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(record) = seq.next_element::<Value>()? {
            self.0.accept(record);
            if self.0.fatal.is_some() {
                return Err(de::Error::custom("ingestion aborted"));
            }
        }
        Ok(())
    }

    fn visit_map<A>(self, map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let record = Value::deserialize(de::value::MapAccessDeserializer::new(map))?;
        self.0.accept(record);
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  Record validation                                                  //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    Long,
    Double,
    Text,
}

impl ValueType {
    fn name(self) -> &'static str {
        match self {
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::Text => "string",
        }
    }
}

/// Turn one decoded record into storage events. Problems with the name,
/// tags, ttl or type reject the whole record; a bad point only drops that
/// point.
fn parse_record(index: usize, record: Value) -> (Vec<DataPointEvent>, Vec<String>) {
    let mut errors = Vec::new();

    let Value::Object(fields) = record else {
        errors.push(format!("metric[{index}] must be a JSON object."));
        return (Vec::new(), errors);
    };

    let name = match fields.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        None | Some(Value::Null) | Some(Value::String(_)) => {
            errors.push(format!("metric[{index}].name may not be empty."));
            return (Vec::new(), errors);
        }
        Some(_) => {
            errors.push(format!("metric[{index}].name must be a string."));
            return (Vec::new(), errors);
        }
    };

    let context = format!("metric[{index}](name={name})");
    let tags = parse_tags(&context, fields.get("tags"), &mut errors);
    let ttl_secs = parse_ttl(&context, fields.get("ttl"), &mut errors);
    let value_type = parse_type(&context, fields.get("type"), &mut errors);
    if !errors.is_empty() {
        return (Vec::new(), errors);
    }

    let points = parse_points(&context, &fields, value_type, &mut errors);
    let events = points
        .into_iter()
        .map(|point| DataPointEvent {
            metric_name: name.clone(),
            tags: tags.clone(),
            point,
            ttl_secs,
        })
        .collect();
    (events, errors)
}

fn parse_tags(context: &str, value: Option<&Value>, errors: &mut Vec<String>) -> Tags {
    let mut tags = Tags::new();
    let before = errors.len();

    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, value) in map {
                if key.is_empty() {
                    errors.push(format!("{context}.tag[].name may not be empty."));
                    continue;
                }
                match value {
                    Value::String(v) if !v.is_empty() => {
                        tags.insert(key.clone(), v.clone());
                    }
                    Value::String(_) => {
                        errors.push(format!("{context}.tag[{key}].value may not be empty."))
                    }
                    _ => errors.push(format!("{context}.tag[{key}].value must be a string.")),
                }
            }
        }
        Some(_) => {
            errors.push(format!("{context}.tags must be an object."));
            return tags;
        }
    }

    if tags.is_empty() && errors.len() == before {
        errors.push(format!(
            "{context}.tags count must be greater than or equal to 1."
        ));
    }
    tags
}

fn parse_ttl(context: &str, value: Option<&Value>, errors: &mut Vec<String>) -> u32 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(ttl) => ttl,
            None => {
                errors.push(format!(
                    "{context}.ttl must be a non-negative number of seconds."
                ));
                0
            }
        },
        Some(_) => {
            errors.push(format!("{context}.ttl must be a number."));
            0
        }
    }
}

fn parse_type(context: &str, value: Option<&Value>, errors: &mut Vec<String>) -> Option<ValueType> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(t)) => match t.as_str() {
            "long" => Some(ValueType::Long),
            "double" => Some(ValueType::Double),
            "string" | "text" => Some(ValueType::Text),
            other => {
                errors.push(format!(
                    "{context}.type \"{other}\" is not a registered data point type."
                ));
                None
            }
        },
        Some(_) => {
            errors.push(format!("{context}.type must be a string."));
            None
        }
    }
}

fn parse_points(
    context: &str,
    fields: &Map<String, Value>,
    value_type: Option<ValueType>,
    errors: &mut Vec<String>,
) -> Vec<DataPoint> {
    let mut points = Vec::new();
    let timestamp = fields.get("timestamp").filter(|v| !v.is_null());
    let datapoints = fields.get("datapoints").filter(|v| !v.is_null());

    if timestamp.is_none() && datapoints.is_none() {
        errors.push(format!(
            "{context} must have either a timestamp and value or datapoints."
        ));
        return points;
    }

    if timestamp.is_some() {
        points.extend(parse_point(
            context,
            timestamp,
            fields.get("value"),
            value_type,
            errors,
        ));
    }

    match datapoints {
        None => {}
        Some(Value::Array(entries)) => {
            for (j, entry) in entries.iter().enumerate() {
                let path = format!("{context}.datapoints[{j}]");
                match entry.as_array().map(Vec::as_slice) {
                    Some([ts, value]) => {
                        points.extend(parse_point(&path, Some(ts), Some(value), value_type, errors))
                    }
                    _ => errors.push(format!("{path} must be a [timestamp, value] pair.")),
                }
            }
        }
        Some(_) => errors.push(format!("{context}.datapoints must be an array.")),
    }

    points
}

fn parse_point(
    path: &str,
    timestamp: Option<&Value>,
    value: Option<&Value>,
    value_type: Option<ValueType>,
    errors: &mut Vec<String>,
) -> Option<DataPoint> {
    let timestamp = match timestamp {
        None | Some(Value::Null) => {
            errors.push(format!("{path}.timestamp may not be null."));
            None
        }
        Some(Value::Number(n)) => match n.as_i64() {
            Some(ts) if ts >= 1 => Some(ts),
            Some(_) => {
                errors.push(format!("{path}.timestamp must be greater than or equal to 1."));
                None
            }
            None => {
                errors.push(format!("{path}.timestamp must be an integer."));
                None
            }
        },
        Some(_) => {
            errors.push(format!("{path}.timestamp must be an integer."));
            None
        }
    };

    let value = parse_value(path, value, value_type, errors);
    Some(DataPoint {
        timestamp: timestamp?,
        value: value?,
    })
}

fn parse_value(
    path: &str,
    value: Option<&Value>,
    value_type: Option<ValueType>,
    errors: &mut Vec<String>,
) -> Option<DataValue> {
    let parsed = match (value_type, value) {
        (_, None | Some(Value::Null)) => {
            errors.push(format!("{path}.value may not be null."));
            return None;
        }
        (_, Some(Value::String(s))) if s.is_empty() => {
            errors.push(format!("{path}.value may not be empty."));
            return None;
        }
        (None, Some(Value::Number(n))) => n
            .as_i64()
            .map(DataValue::Long)
            .or_else(|| n.as_f64().map(DataValue::Double)),
        (None | Some(ValueType::Text), Some(Value::String(s))) => Some(DataValue::Text(s.clone())),
        (Some(ValueType::Long), Some(Value::Number(n))) => n.as_i64().map(DataValue::Long),
        (Some(ValueType::Double), Some(Value::Number(n))) => n.as_f64().map(DataValue::Double),
        (None, Some(_)) => {
            errors.push(format!("{path}.value must be a number or a string."));
            return None;
        }
        (Some(_), Some(_)) => None,
    };

    if parsed.is_none() {
        if let Some(t) = value_type {
            errors.push(format!("{path}.value is not a valid {}.", t.name()));
        }
    }
    parsed
}
