//! Metric data model shared by the registry, the encoder and the publisher.

use serde::Serialize;
use std::collections::BTreeMap;

/// Label set of a sample. Keys are unique by construction.
pub type Labels = BTreeMap<String, String>;

/// Kind of a registered instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// One named observation at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    name: String,
    pub value: f64,
    pub timestamp_ms: i64,
    pub labels: Labels,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64, timestamp_ms: i64, labels: Labels) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp_ms,
            labels,
        }
    }

    /// Sample name; fixed once the sample is built
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Samples produced by a single collection pass, in collection order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSnapshot {
    collected_at_ms: i64,
    samples: Vec<MetricSample>,
}

impl MetricSnapshot {
    pub fn new(collected_at_ms: i64, samples: Vec<MetricSample>) -> Self {
        Self {
            collected_at_ms,
            samples,
        }
    }

    pub fn collected_at_ms(&self) -> i64 {
        self.collected_at_ms
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// First sample with the given name and an exact label match
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&MetricSample> {
        self.samples.iter().find(|s| {
            s.name() == name
                && s.labels.len() == labels.len()
                && labels
                    .iter()
                    .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
        })
    }
}

/// Builds a label map from borrowed pairs
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
