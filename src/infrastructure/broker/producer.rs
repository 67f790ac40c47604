//! Domain-event producer
//!
//! Publishes through the broker circuit breaker after consulting the cached
//! broker health. Retries are bounded and happen in-process with exponential
//! backoff; repeated exhaustion escalates to a fatal status the host observes.

use crate::domain::errors::{BrokerError, PublishError};
use crate::domain::events::BrokerMessage;
use crate::domain::ports::BrokerTransport;
use crate::infrastructure::broker::health_cache::HealthCache;
use crate::infrastructure::core::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::observability::metrics::MetricRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerStatus {
    Ready,
    /// Too many consecutive exhausted publishes; cleared by `reset()`
    Fatal { reason: String },
    Closed,
}

struct PublishCounter {
    registry: Arc<MetricRegistry>,
    name: String,
}

pub struct EventProducer {
    transport: Arc<dyn BrokerTransport>,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthCache>,
    policy: RetryPolicy,
    max_consecutive_exhaustions: u32,
    consecutive_exhaustions: AtomicU32,
    status: watch::Sender<ProducerStatus>,
    counter: Option<PublishCounter>,
}

impl EventProducer {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        breaker: Arc<CircuitBreaker>,
        health: Arc<HealthCache>,
        policy: RetryPolicy,
        max_consecutive_exhaustions: u32,
    ) -> Self {
        let (status, _) = watch::channel(ProducerStatus::Ready);
        Self {
            transport,
            breaker,
            health,
            policy,
            max_consecutive_exhaustions: max_consecutive_exhaustions.max(1),
            consecutive_exhaustions: AtomicU32::new(0),
            status,
            counter: None,
        }
    }

    /// Counts publish outcomes in `name{topic,outcome}`
    pub fn with_metrics(mut self, registry: Arc<MetricRegistry>, name: impl Into<String>) -> Self {
        self.counter = Some(PublishCounter {
            registry,
            name: name.into(),
        });
        self
    }

    pub fn status(&self) -> ProducerStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ProducerStatus> {
        self.status.subscribe()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn publish(
        &self,
        topic: &str,
        messages: &[BrokerMessage],
    ) -> Result<(), PublishError> {
        match self.status() {
            ProducerStatus::Ready => {}
            ProducerStatus::Fatal { reason } => {
                self.count(topic, "fatal");
                return Err(PublishError::Fatal { reason });
            }
            ProducerStatus::Closed => {
                return Err(PublishError::Fatal {
                    reason: "producer is closed".to_string(),
                });
            }
        }

        if topic.trim().is_empty() {
            return Err(PublishError::Invalid {
                reason: "topic must not be empty".to_string(),
            });
        }
        if messages.is_empty() {
            return Err(PublishError::Invalid {
                reason: "at least one message is required".to_string(),
            });
        }

        let health = self.health.get_health(false).await;
        if !health.is_healthy {
            self.count(topic, "unhealthy");
            return Err(PublishError::Unhealthy {
                checked_at_ms: health.last_checked_ms,
                reason: health.error().unwrap_or("unknown").to_string(),
            });
        }

        let attempts = self.policy.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.breaker.call(self.deliver(topic, messages)).await {
                Ok(()) => {
                    self.consecutive_exhaustions.store(0, Ordering::SeqCst);
                    self.count(topic, "success");
                    debug!(
                        "EventProducer: Published {} message(s) to {} (attempt {})",
                        messages.len(),
                        topic,
                        attempt + 1
                    );
                    return Ok(());
                }
                Err(CircuitBreakerError::Open { name, retry_in_ms }) => {
                    self.count(topic, "circuit_open");
                    return Err(PublishError::CircuitOpen { name, retry_in_ms });
                }
                Err(CircuitBreakerError::Inner(e)) => {
                    warn!(
                        "EventProducer: Attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        attempts,
                        topic,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        self.count(topic, "exhausted");
        let last_error = last_error.unwrap_or(BrokerError::Send {
            topic: topic.to_string(),
            reason: "no attempt was made".to_string(),
        });
        self.record_exhaustion(&last_error);
        Err(PublishError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    async fn deliver(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        self.transport.connect().await?;
        let result = self.transport.send(topic, messages).await;
        if let Err(e) = self.transport.disconnect().await {
            debug!("EventProducer: Disconnect after send failed: {}", e);
        }
        result
    }

    fn record_exhaustion(&self, last_error: &BrokerError) {
        let consecutive = self.consecutive_exhaustions.fetch_add(1, Ordering::SeqCst) + 1;
        // The next publish re-probes instead of trusting a stale healthy verdict
        self.health.invalidate();

        if consecutive >= self.max_consecutive_exhaustions {
            let reason = format!(
                "{} consecutive publishes exhausted their retries (last error: {})",
                consecutive, last_error
            );
            error!("EventProducer: Entering fatal state: {}", reason);
            self.status.send_if_modified(|status| {
                if *status == ProducerStatus::Ready {
                    *status = ProducerStatus::Fatal { reason };
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Leaves the fatal state
    pub fn reset(&self) {
        self.consecutive_exhaustions.store(0, Ordering::SeqCst);
        let reset = self.status.send_if_modified(|status| {
            if matches!(status, ProducerStatus::Fatal { .. }) {
                *status = ProducerStatus::Ready;
                true
            } else {
                false
            }
        });
        if reset {
            info!("EventProducer: Reset to ready");
        }
    }

    /// Rejects further publishes and disconnects the transport
    pub async fn close(&self) {
        self.status.send_replace(ProducerStatus::Closed);
        if let Err(e) = self.transport.disconnect().await {
            warn!("EventProducer: Disconnect on close failed: {}", e);
        }
        info!("EventProducer: Closed");
    }

    fn count(&self, topic: &str, outcome: &str) {
        if let Some(counter) = &self.counter {
            if let Err(e) = counter
                .registry
                .inc(&counter.name, &[("topic", topic), ("outcome", outcome)])
            {
                debug!("EventProducer: Failed to count publish: {}", e);
            }
        }
    }
}
