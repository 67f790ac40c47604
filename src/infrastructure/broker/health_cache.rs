use crate::domain::ports::{BrokerTransport, Clock};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of the most recent broker connectivity probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCacheEntry {
    pub is_healthy: bool,
    pub last_checked_ms: i64,
    pub details: BTreeMap<String, String>,
}

impl HealthCacheEntry {
    /// Failure description recorded by the probe, if any
    pub fn error(&self) -> Option<&str> {
        self.details.get("error").map(String::as_str)
    }
}

/// Memoizes broker health for a TTL window.
///
/// Stale readers queue behind one refresh lock, so concurrent callers share a
/// single probe. A failed probe is cached like any other verdict.
pub struct HealthCache {
    transport: Arc<dyn BrokerTransport>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    probe_timeout: Duration,
    entry: RwLock<Option<HealthCacheEntry>>,
    /// Bumped by every completed probe
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl HealthCache {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        clock: Arc<dyn Clock>,
        ttl_ms: u64,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            ttl_ms: ttl_ms as i64,
            probe_timeout,
            entry: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn is_stale(&self, entry: &HealthCacheEntry) -> bool {
        self.clock.now_ms() - entry.last_checked_ms >= self.ttl_ms
    }

    /// Cached verdict without probing
    pub fn cached(&self) -> Option<HealthCacheEntry> {
        self.entry.read().clone()
    }

    /// Returns the cached verdict, probing first when it is missing, stale or `force` is set
    pub async fn get_health(&self, force: bool) -> HealthCacheEntry {
        if !force {
            if let Some(entry) = self.fresh_entry() {
                return entry;
            }
        }
        let seen_generation = self.generation.load(Ordering::Acquire);

        let _refresh = self.refresh_lock.lock().await;

        // A refresh that completed while we waited answers this call too
        if self.generation.load(Ordering::Acquire) != seen_generation {
            if let Some(entry) = self.cached() {
                return entry;
            }
        }
        if !force {
            if let Some(entry) = self.fresh_entry() {
                return entry;
            }
        }

        let entry = self.probe().await;
        *self.entry.write() = Some(entry.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        entry
    }

    /// Drops the cached verdict so the next query probes
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }

    fn fresh_entry(&self) -> Option<HealthCacheEntry> {
        self.cached().filter(|entry| !self.is_stale(entry))
    }

    async fn probe(&self) -> HealthCacheEntry {
        let mut details = BTreeMap::new();
        let result = tokio::time::timeout(self.probe_timeout, self.transport.list_topics()).await;
        let checked_at = self.clock.now_ms();

        let is_healthy = match result {
            Ok(Ok(topics)) => {
                debug!("HealthCache: Broker healthy ({} topics)", topics.len());
                details.insert("topics".to_string(), topics.len().to_string());
                true
            }
            Ok(Err(e)) => {
                warn!("HealthCache: Broker probe failed: {}", e);
                details.insert("error".to_string(), e.to_string());
                false
            }
            Err(_) => {
                warn!(
                    "HealthCache: Broker probe timed out after {:?}",
                    self.probe_timeout
                );
                details.insert(
                    "error".to_string(),
                    format!("probe timed out after {}ms", self.probe_timeout.as_millis()),
                );
                false
            }
        };

        HealthCacheEntry {
            is_healthy,
            last_checked_ms: checked_at,
            details,
        }
    }
}
