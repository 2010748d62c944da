//! Output records and the sinks that write them.
//!
//! Collectors produce typed snapshots and convert them to [`Metric`] only when
//! handing them off, so sinks stay independent of what was measured.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// One measurement at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(FieldValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Destination for gathered metrics.
pub trait MetricSink {
    fn emit(&mut self, metric: &Metric) -> io::Result<()>;

    fn emit_all(&mut self, metrics: &[Metric]) -> io::Result<()> {
        for metric in metrics {
            self.emit(metric)?;
        }
        self.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes InfluxDB line protocol.
pub struct LineProtocolSink<W: Write> {
    out: W,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn escape(s: &str, special: &[char], buf: &mut String) {
    for c in s.chars() {
        if special.contains(&c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}

/// Renders `metric` as one line-protocol line (without the newline).
///
/// Returns `None` for metrics without fields, which the protocol cannot
/// represent.
pub fn to_line_protocol(metric: &Metric) -> Option<String> {
    if metric.fields.is_empty() {
        return None;
    }

    let mut line = String::new();
    escape(&metric.measurement, &[',', ' '], &mut line);
    for (key, value) in &metric.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        escape(key, &[',', '=', ' '], &mut line);
        line.push('=');
        escape(value, &[',', '=', ' '], &mut line);
    }

    for (i, (key, value)) in metric.fields.iter().enumerate() {
        line.push(if i == 0 { ' ' } else { ',' });
        escape(key, &[',', '=', ' '], &mut line);
        line.push('=');
        match value {
            FieldValue::Int(v) => {
                let _ = write!(line, "{v}i");
            }
            FieldValue::Float(v) => {
                let _ = write!(line, "{v}");
            }
            FieldValue::Str(v) => {
                line.push('"');
                escape(v, &['"', '\\'], &mut line);
                line.push('"');
            }
        }
    }

    if let Some(nanos) = metric.timestamp.timestamp_nanos_opt() {
        let _ = write!(line, " {nanos}");
    }
    Some(line)
}

impl<W: Write> MetricSink for LineProtocolSink<W> {
    fn emit(&mut self, metric: &Metric) -> io::Result<()> {
        match to_line_protocol(metric) {
            Some(line) => writeln!(self.out, "{line}"),
            None => {
                debug!(measurement = %metric.measurement, "skipping metric without fields");
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricSink for JsonLinesSink<W> {
    fn emit(&mut self, metric: &Metric) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, metric)?;
        self.out.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Keeps every emitted metric in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub metrics: Vec<Metric>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, measurement: &str) -> impl Iterator<Item = &Metric> {
        self.metrics
            .iter()
            .filter(move |m| m.measurement == measurement)
    }
}

impl MetricSink for MemorySink {
    fn emit(&mut self, metric: &Metric) -> io::Result<()> {
        self.metrics.push(metric.clone());
        Ok(())
    }
}
