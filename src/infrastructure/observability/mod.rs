//! Telemetry export for Pulseflow
//!
//! Metrics are recorded in-process and shipped two ways:
//!
//! 1. **Remote write**: snapshots are encoded as protobuf, snappy-compressed
//!    and pushed to the time-series backend on a fixed interval.
//! 2. **Scrape endpoint**: `/metrics` renders the Prometheus text format and
//!    `/healthz` reports broker health.

pub mod compression;
pub mod latency_tracker;
pub mod metrics;
pub mod publisher;
pub mod push_client;
pub mod rate_limiter;
pub mod remote_write;
pub mod sanitizer;
pub mod scrape;

pub use metrics::{MetricRegistry, PipelineMetrics};
pub use publisher::{CycleOutcome, FailureKind, SkipReason, TelemetryPublisher};
pub use push_client::{HttpRemoteWriteClient, PushAuth};
pub use rate_limiter::RateLimiter;
pub use remote_write::RemoteWriteEncoder;
