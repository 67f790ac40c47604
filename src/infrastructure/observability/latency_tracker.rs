use crate::infrastructure::observability::metrics::MetricRegistry;
use std::time::Instant;
use tracing::debug;

/// RAII guard that records elapsed seconds into a registered histogram
pub struct LatencyGuard<'a> {
    start: Instant,
    registry: &'a MetricRegistry,
    histogram: &'a str,
}

impl<'a> LatencyGuard<'a> {
    pub fn new(registry: &'a MetricRegistry, histogram: &'a str) -> Self {
        Self {
            start: Instant::now(),
            registry,
            histogram,
        }
    }
}

impl Drop for LatencyGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        if let Err(e) = self.registry.record(self.histogram, elapsed, &[]) {
            debug!("LatencyGuard: Failed to record {}: {}", self.histogram, e);
        }
    }
}
