//! Prometheus remote-write 0.1.0 payload encoding

use crate::domain::errors::EncodingError;
use crate::domain::metrics::{Labels, MetricSnapshot};
use crate::infrastructure::observability::sanitizer::{is_sanitized, sanitize};
use prost::Message;

pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl TimeSeries {
    /// Value of a label by name
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }
}

/// Converts snapshots into serialized `WriteRequest` bodies
#[derive(Debug, Clone, Default)]
pub struct RemoteWriteEncoder {
    default_labels: Labels,
}

impl RemoteWriteEncoder {
    pub fn new(default_labels: Labels) -> Self {
        Self { default_labels }
    }

    pub fn default_labels(&self) -> &Labels {
        &self.default_labels
    }

    /// One series per sample, in snapshot order
    pub fn build(&self, snapshot: &MetricSnapshot) -> Result<WriteRequest, EncodingError> {
        let mut timeseries = Vec::with_capacity(snapshot.len());

        for sample in snapshot.samples() {
            if !sample.value.is_finite() {
                return Err(EncodingError::NonFiniteValue {
                    name: sample.name().to_string(),
                    value: sample.value,
                });
            }

            let mut merged = self.default_labels.clone();
            merged.extend(sample.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged.insert(METRIC_NAME_LABEL.to_string(), sanitize(sample.name()));

            timeseries.push(TimeSeries {
                labels: merged
                    .into_iter()
                    .map(|(name, value)| Label { name, value })
                    .collect(),
                samples: vec![Sample {
                    value: sample.value,
                    timestamp: sample.timestamp_ms,
                }],
            });
        }

        Ok(WriteRequest { timeseries })
    }

    /// Builds, serializes and verifies the payload for `snapshot`
    pub fn encode(&self, snapshot: &MetricSnapshot) -> Result<Vec<u8>, EncodingError> {
        let request = self.build(snapshot)?;
        let bytes = request.encode_to_vec();
        verify(&bytes, request.timeseries.len())?;
        Ok(bytes)
    }
}

/// Decodes a serialized `WriteRequest`
pub fn decode(bytes: &[u8]) -> Result<WriteRequest, EncodingError> {
    WriteRequest::decode(bytes).map_err(|e| EncodingError::SchemaViolation {
        reason: format!("failed to decode WriteRequest: {}", e),
    })
}

/// Checks serialized bytes against the remote-write schema
fn verify(bytes: &[u8], expected_series: usize) -> Result<(), EncodingError> {
    let violation = |reason: String| EncodingError::SchemaViolation { reason };
    let request = decode(bytes)?;

    if request.timeseries.len() != expected_series {
        return Err(violation(format!(
            "expected {} series, decoded {}",
            expected_series,
            request.timeseries.len()
        )));
    }

    for (index, series) in request.timeseries.iter().enumerate() {
        match series.label(METRIC_NAME_LABEL) {
            Some(name) if is_sanitized(name) => {}
            _ => return Err(violation(format!("series {} has no valid metric name", index))),
        }
        if series.samples.len() != 1 {
            return Err(violation(format!(
                "series {} carries {} samples",
                index,
                series.samples.len()
            )));
        }
        // Names must be non-empty and strictly ascending
        let mut previous: Option<&str> = None;
        for label in &series.labels {
            if label.name.is_empty() {
                return Err(violation(format!("series {} has an empty label name", index)));
            }
            if previous.is_some_and(|p| p >= label.name.as_str()) {
                return Err(violation(format!(
                    "series {} labels are not sorted or unique at '{}'",
                    index, label.name
                )));
            }
            previous = Some(&label.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::{labels, MetricSample};

    fn encoder() -> RemoteWriteEncoder {
        RemoteWriteEncoder::new(labels(&[
            ("app", "pulse_flow"),
            ("environment", "test"),
        ]))
    }

    #[test]
    fn test_encode_merges_default_labels() {
        let snapshot = MetricSnapshot::new(
            5_000,
            vec![
                MetricSample::new(
                    "Pulse-Flow.Tweets",
                    7.0,
                    5_000,
                    labels(&[("environment", "override"), ("status", "created")]),
                ),
                MetricSample::new("pulse_flow_uptime_seconds", 12.5, 5_000, labels(&[])),
            ],
        );

        let bytes = encoder().encode(&snapshot).unwrap();
        let request = decode(&bytes).unwrap();

        assert_eq!(request.timeseries.len(), 2);
        let first = &request.timeseries[0];
        assert_eq!(first.label(METRIC_NAME_LABEL), Some("pulse_flow_tweets"));
        assert_eq!(first.label("app"), Some("pulse_flow"));
        assert_eq!(first.label("environment"), Some("override"));
        assert_eq!(first.label("status"), Some("created"));
        assert_eq!(
            first.samples,
            vec![Sample {
                value: 7.0,
                timestamp: 5_000
            }]
        );

        let second = &request.timeseries[1];
        assert_eq!(second.label(METRIC_NAME_LABEL), Some("pulse_flow_uptime_seconds"));
        assert_eq!(second.label("environment"), Some("test"));
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let snapshot = MetricSnapshot::new(
                0,
                vec![MetricSample::new("latency", value, 0, labels(&[]))],
            );
            assert!(matches!(
                encoder().encode(&snapshot),
                Err(EncodingError::NonFiniteValue { .. })
            ));
        }
    }

    #[test]
    fn test_encode_empty_snapshot() {
        let bytes = encoder().encode(&MetricSnapshot::default()).unwrap();
        assert!(decode(&bytes).unwrap().timeseries.is_empty());
    }

    #[test]
    fn test_labels_sorted_by_name() {
        let snapshot = MetricSnapshot::new(
            0,
            vec![MetricSample::new(
                "orders_total",
                1.0,
                0,
                labels(&[("zone", "eu"), ("side", "buy")]),
            )],
        );
        let request = encoder().build(&snapshot).unwrap();
        let names: Vec<&str> = request.timeseries[0]
            .labels
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(names, vec!["__name__", "app", "environment", "side", "zone"]);
    }

    #[test]
    fn test_verify_rejects_empty_label_name() {
        let snapshot = MetricSnapshot::new(
            0,
            vec![MetricSample::new("orders_total", 1.0, 0, labels(&[("", "x")]))],
        );
        assert!(matches!(
            encoder().encode(&snapshot),
            Err(EncodingError::SchemaViolation { .. })
        ));
    }
}
