//! In-process metric registry for Pulseflow
//!
//! Instruments are registered up-front with a fixed label schema and backed by
//! the `prometheus` crate. Snapshots are taken under a collection gate so a
//! snapshot never observes a half-applied write.

use crate::domain::errors::ValidationError;
use crate::domain::metrics::{Labels, MetricKind, MetricSample, MetricSnapshot};
use crate::domain::ports::Clock;
use crate::infrastructure::observability::sanitizer::is_sanitized;
use parking_lot::RwLock;
use prometheus::proto::{Metric, MetricFamily, MetricType};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

enum Handle {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

struct Instrument {
    kind: MetricKind,
    label_names: Vec<String>,
    handle: Handle,
}

/// Registry of named instruments with point-in-time snapshots
pub struct MetricRegistry {
    registry: Registry,
    instruments: RwLock<HashMap<String, Instrument>>,
    /// Writers share the read side, `snapshot()` takes the write side
    collection_gate: RwLock<()>,
    clock: Arc<dyn Clock>,
}

impl MetricRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Registry::new(),
            instruments: RwLock::new(HashMap::new()),
            collection_gate: RwLock::new(()),
            clock,
        }
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<(), ValidationError> {
        self.check_definition(name, label_names)?;
        let vec = CounterVec::new(Opts::new(name, help), label_names)
            .map_err(|e| invalid_definition(name, e))?;
        self.install(name, MetricKind::Counter, label_names, Handle::Counter(vec))
    }

    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<(), ValidationError> {
        self.check_definition(name, label_names)?;
        let vec = GaugeVec::new(Opts::new(name, help), label_names)
            .map_err(|e| invalid_definition(name, e))?;
        self.install(name, MetricKind::Gauge, label_names, Handle::Gauge(vec))
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: Vec<f64>,
    ) -> Result<(), ValidationError> {
        self.check_definition(name, label_names)?;
        let vec = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), label_names)
            .map_err(|e| invalid_definition(name, e))?;
        self.install(name, MetricKind::Histogram, label_names, Handle::Histogram(vec))
    }

    fn check_definition(&self, name: &str, label_names: &[&str]) -> Result<(), ValidationError> {
        if self.instruments.read().contains_key(name) {
            return Err(ValidationError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        let mut seen = HashSet::new();
        for label in label_names {
            if !seen.insert(*label) {
                return Err(ValidationError::DuplicateLabel {
                    name: name.to_string(),
                    key: label.to_string(),
                });
            }
            if !is_sanitized(label) || label.starts_with("__") || *label == "le" {
                return Err(ValidationError::InvalidDefinition {
                    name: name.to_string(),
                    reason: format!("label name '{}' is not allowed", label),
                });
            }
        }
        Ok(())
    }

    fn install(
        &self,
        name: &str,
        kind: MetricKind,
        label_names: &[&str],
        handle: Handle,
    ) -> Result<(), ValidationError> {
        let collector: Box<dyn prometheus::core::Collector> = match &handle {
            Handle::Counter(v) => Box::new(v.clone()),
            Handle::Gauge(v) => Box::new(v.clone()),
            Handle::Histogram(v) => Box::new(v.clone()),
        };

        let mut instruments = self.instruments.write();
        if instruments.contains_key(name) {
            return Err(ValidationError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        self.registry
            .register(collector)
            .map_err(|e| invalid_definition(name, e))?;
        instruments.insert(
            name.to_string(),
            Instrument {
                kind,
                label_names: label_names.iter().map(|l| l.to_string()).collect(),
                handle,
            },
        );
        Ok(())
    }

    /// Applies an observation: counters increment, gauges set, histograms observe.
    pub fn record(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), ValidationError> {
        let mut keys = HashSet::with_capacity(labels.len());
        for (key, _) in labels {
            if !keys.insert(*key) {
                return Err(ValidationError::DuplicateLabel {
                    name: name.to_string(),
                    key: key.to_string(),
                });
            }
        }
        if !value.is_finite() {
            return Err(ValidationError::NonFinite {
                name: name.to_string(),
                value,
            });
        }

        let instruments = self.instruments.read();
        let instrument = instruments
            .get(name)
            .ok_or_else(|| ValidationError::UnknownMetric {
                name: name.to_string(),
            })?;

        let values = ordered_label_values(name, &instrument.label_names, labels)?;
        if instrument.kind == MetricKind::Counter && value < 0.0 {
            return Err(ValidationError::NegativeIncrement {
                name: name.to_string(),
                value,
            });
        }

        let _gate = self.collection_gate.read();
        match &instrument.handle {
            Handle::Counter(v) => v.with_label_values(&values).inc_by(value),
            Handle::Gauge(v) => v.with_label_values(&values).set(value),
            Handle::Histogram(v) => v.with_label_values(&values).observe(value),
        }
        Ok(())
    }

    /// Increments a counter by one
    pub fn inc(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), ValidationError> {
        self.record(name, 1.0, labels)
    }

    /// Adds CPU, memory, fd and thread gauges for this process under `namespace`
    #[cfg(target_os = "linux")]
    pub fn register_process_metrics(&self, namespace: &str) -> Result<(), ValidationError> {
        use prometheus::process_collector::{ProcessCollector, pid_t};

        let pid = std::process::id() as pid_t;
        self.registry
            .register(Box::new(ProcessCollector::new(pid, namespace)))
            .map_err(|e| invalid_definition(namespace, e))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn register_process_metrics(&self, _namespace: &str) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Consistent point-in-time copy of every instrument
    pub fn snapshot(&self) -> MetricSnapshot {
        let families = {
            let _gate = self.collection_gate.write();
            self.registry.gather()
        };
        let now = self.clock.now_ms();

        let mut samples = Vec::new();
        for family in &families {
            flatten_family(family, now, &mut samples);
        }
        MetricSnapshot::new(now, samples)
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let families = {
            let _gate = self.collection_gate.write();
            self.registry.gather()
        };
        TextEncoder::new().encode_to_string(&families)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

fn invalid_definition(name: &str, e: prometheus::Error) -> ValidationError {
    ValidationError::InvalidDefinition {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Orders label values by schema, rejecting any set that is not exactly the schema
fn ordered_label_values<'a>(
    name: &str,
    schema: &[String],
    labels: &[(&str, &'a str)],
) -> Result<Vec<&'a str>, ValidationError> {
    let mismatch = || ValidationError::LabelMismatch {
        name: name.to_string(),
        expected: schema.to_vec(),
        actual: labels.iter().map(|(k, _)| k.to_string()).collect(),
    };

    if schema.len() != labels.len() {
        return Err(mismatch());
    }
    schema
        .iter()
        .map(|key| {
            labels
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| *v)
                .ok_or_else(mismatch)
        })
        .collect()
}

fn metric_labels(metric: &Metric) -> Labels {
    metric
        .get_label()
        .iter()
        .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
        .collect()
}

fn flatten_family(family: &MetricFamily, now: i64, out: &mut Vec<MetricSample>) {
    let name = family.get_name();

    for metric in family.get_metric() {
        let labels = metric_labels(metric);
        match family.get_field_type() {
            MetricType::COUNTER => {
                out.push(MetricSample::new(name, metric.get_counter().value(), now, labels));
            }
            MetricType::GAUGE => {
                out.push(MetricSample::new(name, metric.get_gauge().value(), now, labels));
            }
            MetricType::HISTOGRAM => {
                let histogram = metric.get_histogram();
                let bucket_name = format!("{}_bucket", name);
                let mut inf_seen = false;

                for bucket in histogram.get_bucket() {
                    let upper = bucket.upper_bound();
                    inf_seen |= upper.is_infinite() && upper.is_sign_positive();
                    out.push(
                        MetricSample::new(
                            bucket_name.as_str(),
                            bucket.cumulative_count() as f64,
                            now,
                            labels.clone(),
                        )
                        .with_label("le", format_bound(upper)),
                    );
                }
                if !inf_seen {
                    out.push(
                        MetricSample::new(
                            bucket_name.as_str(),
                            histogram.get_sample_count() as f64,
                            now,
                            labels.clone(),
                        )
                        .with_label("le", "+Inf"),
                    );
                }
                out.push(MetricSample::new(
                    format!("{}_sum", name),
                    histogram.get_sample_sum(),
                    now,
                    labels.clone(),
                ));
                out.push(MetricSample::new(
                    format!("{}_count", name),
                    histogram.get_sample_count() as f64,
                    now,
                    labels,
                ));
            }
            _ => {}
        }
    }
}

fn format_bound(bound: f64) -> String {
    if bound.is_infinite() && bound.is_sign_positive() {
        "+Inf".to_string()
    } else {
        bound.to_string()
    }
}

/// Names of the metrics the pipeline records about itself
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub push_total: String,
    pub push_errors_total: String,
    pub push_duration_seconds: String,
    pub broker_publish_total: String,
    pub circuit_breaker_state: String,
    pub uptime_seconds: String,
}

impl PipelineMetrics {
    /// Registers the pipeline self-metrics under `prefix`
    pub fn register(registry: &MetricRegistry, prefix: &str) -> Result<Self, ValidationError> {
        let names = Self {
            push_total: format!("{}telemetry_push_total", prefix),
            push_errors_total: format!("{}telemetry_push_errors_total", prefix),
            push_duration_seconds: format!("{}telemetry_push_duration_seconds", prefix),
            broker_publish_total: format!("{}broker_publish_total", prefix),
            circuit_breaker_state: format!("{}circuit_breaker_state", prefix),
            uptime_seconds: format!("{}uptime_seconds", prefix),
        };

        registry.register_counter(
            &names.push_total,
            "Remote-write push cycles by outcome",
            &["outcome"],
        )?;
        registry.register_counter(
            &names.push_errors_total,
            "Remote-write push failures by kind",
            &["kind"],
        )?;
        registry.register_histogram(
            &names.push_duration_seconds,
            "Remote-write HTTP send latency in seconds",
            &[],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?;
        registry.register_counter(
            &names.broker_publish_total,
            "Broker publish attempts by topic and outcome",
            &["topic", "outcome"],
        )?;
        registry.register_gauge(
            &names.circuit_breaker_state,
            "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            &["breaker"],
        )?;
        registry.register_gauge(&names.uptime_seconds, "Process uptime in seconds", &[])?;
        registry.register_process_metrics(prefix.trim_end_matches('_'))?;

        Ok(names)
    }
}
