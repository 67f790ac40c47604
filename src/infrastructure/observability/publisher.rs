//! Remote-write publisher for Pulseflow
//!
//! Each cycle takes a snapshot, encodes and compresses it, consults the rate
//! limiter and pushes the payload. Cycle-local faults become counters and log
//! lines; the next tick is the only retry.

use crate::domain::errors::PushError;
use crate::domain::ports::{Clock, PushRequest, PushResponse, RemoteWriteTransport};
use crate::infrastructure::observability::compression::{self, SNAPPY_ENCODING};
use crate::infrastructure::observability::latency_tracker::LatencyGuard;
use crate::infrastructure::observability::metrics::{MetricRegistry, PipelineMetrics};
use crate::infrastructure::observability::rate_limiter::RateLimiter;
use crate::infrastructure::observability::remote_write::RemoteWriteEncoder;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Cool-down applied when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Local quota or an active cool-down denied the push
    RateLimited { retry_after_ms: u64 },
    /// Backend answered 429; a cool-down was applied
    BackendThrottled { retry_after_secs: u64 },
    /// Another cycle was still in flight
    Overlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Encoding,
    Compression,
    Network,
    Timeout,
    Http { status: u16 },
}

impl FailureKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::Encoding => "encoding",
            FailureKind::Compression => "compression",
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Http { .. } => "http",
        }
    }
}

impl From<&PushError> for FailureKind {
    fn from(e: &PushError) -> Self {
        match e {
            PushError::Network { .. } => FailureKind::Network,
            PushError::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Terminal state of one push cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success { series: usize },
    Skipped { reason: SkipReason },
    Failed { kind: FailureKind },
}

impl CycleOutcome {
    fn outcome_label(&self) -> &'static str {
        match self {
            CycleOutcome::Success { .. } => "success",
            CycleOutcome::Skipped {
                reason: SkipReason::BackendThrottled { .. },
            } => "rate_limited",
            CycleOutcome::Skipped { .. } => "skipped",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}

/// Payload of a single push attempt; dropped when the attempt ends
#[derive(Debug)]
struct PushEnvelope {
    series: usize,
    encoded_len: usize,
    compressed: Vec<u8>,
}

/// Accepts `Retry-After` as non-negative integer seconds only
pub fn parse_retry_after(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Clears the in-flight flag even if the cycle future is dropped mid-way
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TelemetryPublisher {
    registry: Arc<MetricRegistry>,
    metrics: PipelineMetrics,
    encoder: RemoteWriteEncoder,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn RemoteWriteTransport>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    started_at_ms: i64,
    in_flight: AtomicBool,
    closed: AtomicBool,
}

impl TelemetryPublisher {
    pub fn new(
        registry: Arc<MetricRegistry>,
        metrics: PipelineMetrics,
        encoder: RemoteWriteEncoder,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn RemoteWriteTransport>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let started_at_ms = clock.now_ms();
        Self {
            registry,
            metrics,
            encoder,
            limiter,
            transport,
            clock,
            interval,
            started_at_ms,
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops later cycles from mutating the shared rate window
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Runs one push cycle. Never fails; the outcome is also counted.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("TelemetryPublisher: Previous cycle still in flight, skipping tick");
            let outcome = CycleOutcome::Skipped {
                reason: SkipReason::Overlap,
            };
            self.count_outcome(&outcome);
            return outcome;
        }
        let _in_flight = InFlight(&self.in_flight);

        let outcome = self.execute().await;
        self.count_outcome(&outcome);
        outcome
    }

    async fn execute(&self) -> CycleOutcome {
        self.refresh_uptime();

        let envelope = match self.prepare() {
            Ok(envelope) => envelope,
            Err(kind) => return CycleOutcome::Failed { kind },
        };

        let decision = self.limiter.try_acquire(self.clock.now_ms());
        if !decision.allowed {
            // Silent backpressure
            debug!(
                "TelemetryPublisher: Rate limited, retry in {:?}ms",
                decision.retry_after_ms
            );
            return CycleOutcome::Skipped {
                reason: SkipReason::RateLimited {
                    retry_after_ms: decision.retry_after_ms.unwrap_or(0),
                },
            };
        }

        let request = PushRequest {
            body: envelope.compressed,
            content_encoding: SNAPPY_ENCODING,
        };
        let result = {
            let _latency = LatencyGuard::new(&self.registry, &self.metrics.push_duration_seconds);
            self.transport.send(request).await
        };

        match result {
            Ok(response) => self.classify(response, envelope.series),
            Err(e) => {
                warn!("TelemetryPublisher: Push failed: {}", e);
                CycleOutcome::Failed {
                    kind: FailureKind::from(&e),
                }
            }
        }
    }

    fn prepare(&self) -> Result<PushEnvelope, FailureKind> {
        let snapshot = self.registry.snapshot();

        let encoded = self.encoder.encode(&snapshot).map_err(|e| {
            warn!("TelemetryPublisher: Encoding failed: {}", e);
            FailureKind::Encoding
        })?;
        let compressed = compression::compress(&encoded).map_err(|e| {
            warn!("TelemetryPublisher: {}", e);
            FailureKind::Compression
        })?;

        let envelope = PushEnvelope {
            series: snapshot.len(),
            encoded_len: encoded.len(),
            compressed,
        };
        debug!(
            "TelemetryPublisher: Prepared {} series collected at {} ({} bytes, {} compressed)",
            envelope.series,
            snapshot.collected_at_ms(),
            envelope.encoded_len,
            envelope.compressed.len()
        );
        Ok(envelope)
    }

    fn classify(&self, response: PushResponse, series: usize) -> CycleOutcome {
        match response.status {
            200..=299 => {
                debug!("TelemetryPublisher: Pushed {} series", series);
                CycleOutcome::Success { series }
            }
            429 => {
                let retry_after_secs = parse_retry_after(response.retry_after.as_deref());
                if self.is_closed() {
                    debug!("TelemetryPublisher: Closed, ignoring backend cool-down");
                } else {
                    let until = self
                        .clock
                        .now_ms()
                        .saturating_add((retry_after_secs as i64).saturating_mul(1000));
                    self.limiter.impose_cooldown(until);
                }
                info!(
                    "TelemetryPublisher: Backend throttled pushes, cooling down {}s",
                    retry_after_secs
                );
                CycleOutcome::Skipped {
                    reason: SkipReason::BackendThrottled { retry_after_secs },
                }
            }
            status => {
                warn!("TelemetryPublisher: Push rejected with HTTP {}", status);
                CycleOutcome::Failed {
                    kind: FailureKind::Http { status },
                }
            }
        }
    }

    fn refresh_uptime(&self) {
        let uptime = (self.clock.now_ms() - self.started_at_ms).max(0) as f64 / 1000.0;
        if let Err(e) = self.registry.record(&self.metrics.uptime_seconds, uptime, &[]) {
            debug!("TelemetryPublisher: Failed to record uptime: {}", e);
        }
    }

    fn count_outcome(&self, outcome: &CycleOutcome) {
        let mut result = self
            .registry
            .inc(&self.metrics.push_total, &[("outcome", outcome.outcome_label())]);
        if let CycleOutcome::Failed { kind } = outcome {
            result = result.and(
                self.registry
                    .inc(&self.metrics.push_errors_total, &[("kind", kind.as_label())]),
            );
        }
        if let Err(e) = result {
            debug!("TelemetryPublisher: Failed to count outcome: {}", e);
        }
    }

    /// Runs cycles on a fixed interval until `shutdown` flips to true.
    ///
    /// The first tick fires one interval after start. On shutdown, cycles still
    /// in flight get `grace` to finish and are aborted afterwards.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        grace: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "TelemetryPublisher: Starting remote-write loop (interval: {:?})",
                self.interval
            );
            let first_tick = Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(first_tick, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cycles: JoinSet<CycleOutcome> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        while cycles.try_join_next().is_some() {}
                        let publisher = self.clone();
                        cycles.spawn(async move { publisher.run_cycle().await });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.close();
            let drained = tokio::time::timeout(grace, async {
                while cycles.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    "TelemetryPublisher: In-flight push exceeded {:?} grace, aborting",
                    grace
                );
                cycles.abort_all();
            }
            info!("TelemetryPublisher: Stopped");
        })
    }
}
