use crate::domain::ports::Clock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Error ratio breached - reject all requests
    HalfOpen, // Testing if service recovered - exactly one trial request
}

impl CircuitState {
    /// Gauge encoding: 0=Closed, 1=HalfOpen, 2=Open
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Emitted exactly once per state change
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitTransition {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Opens when the rolling error percentage strictly exceeds this value
    pub error_threshold_pct: f64,
    /// Minimum calls in the rolling window before the ratio is evaluated
    pub min_samples: u32,
    /// Time spent Open before a trial call is admitted
    pub reset_timeout_ms: u64,
    pub rolling_window_ms: u64,
    pub rolling_buckets: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_pct: 50.0,
            min_samples: 5,
            reset_timeout_ms: 30_000,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
        }
    }
}

/// Point-in-time view of the breaker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_transition_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start_ms: i64,
    successes: u32,
    failures: u32,
}

/// Time-bucketed success/failure counts over the last `window_ms`
#[derive(Debug)]
struct RollingWindow {
    window_ms: i64,
    bucket_ms: i64,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn new(window_ms: u64, buckets: u32) -> Self {
        let window_ms = window_ms.max(1) as i64;
        let bucket_ms = (window_ms / buckets.max(1) as i64).max(1);
        Self {
            window_ms,
            bucket_ms,
            buckets: VecDeque::new(),
        }
    }

    fn prune(&mut self, now_ms: i64) {
        let horizon = now_ms - self.window_ms;
        while let Some(front) = self.buckets.front() {
            if front.start_ms + self.bucket_ms <= horizon {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now_ms: i64, success: bool) {
        self.prune(now_ms);
        let start_ms = now_ms - now_ms.rem_euclid(self.bucket_ms);
        let needs_bucket = self
            .buckets
            .back()
            .is_none_or(|b| b.start_ms != start_ms);
        if needs_bucket {
            self.buckets.push_back(Bucket {
                start_ms,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if success {
                bucket.successes += 1;
            } else {
                bucket.failures += 1;
            }
        }
    }

    fn counts(&mut self, now_ms: i64) -> (u32, u32) {
        self.prune(now_ms);
        self.buckets
            .iter()
            .fold((0, 0), |(s, f), b| (s + b.successes, f + b.failures))
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

struct CircuitBreakerState {
    state: CircuitState,
    window: RollingWindow,
    opened_at_ms: i64,
    last_transition_ms: i64,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker guarding calls to a failing dependency
///
/// Tracks a rolling error percentage while Closed, fails fast while Open and
/// admits a single trial call once the reset timeout has elapsed.
pub struct CircuitBreaker {
    state: Mutex<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    transitions: broadcast::Sender<CircuitTransition>,
    name: String,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    ///
    /// # Arguments
    /// * `name` - Identifier for logging and transition notifications
    /// * `config` - Thresholds, reset timeout and rolling window
    /// * `clock` - Time source for the rolling window and reset timeout
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(64);
        let now = clock.now_ms();
        Self {
            state: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                window: RollingWindow::new(config.rolling_window_ms, config.rolling_buckets),
                opened_at_ms: 0,
                last_transition_ms: now,
                trial_in_flight: false,
            }),
            config,
            clock,
            transitions,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a future with circuit breaker protection
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let admission = self.admit::<E>()?;
        let mut guard = CallGuard {
            breaker: self,
            admission,
            settled: false,
        };

        match f.await {
            Ok(result) => {
                guard.settled = true;
                self.on_success(admission);
                Ok(result)
            }
            Err(e) => {
                guard.settled = true;
                self.on_failure(admission);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission, CircuitBreakerError<E>> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = now - state.opened_at_ms;
                let timeout = self.config.reset_timeout_ms as i64;
                if elapsed >= timeout {
                    self.transition(&mut state, CircuitState::HalfOpen, now);
                    state.trial_in_flight = true;
                    Ok(Admission::Trial)
                } else {
                    Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_in_ms: (timeout - elapsed) as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_in_ms: 0,
                    })
                } else {
                    state.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    /// Record a successful call
    fn on_success(&self, admission: Admission) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();

        match (state.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                state.trial_in_flight = false;
                state.window.reset();
                self.transition(&mut state, CircuitState::Closed, now);
            }
            (CircuitState::Closed, _) => state.window.record(now, true),
            (current, _) => {
                // A call admitted before the circuit opened finished late
                debug!(
                    "CircuitBreaker [{}]: Ignoring late success while {:?}",
                    self.name, current
                );
            }
        }
    }

    /// Record a failed call
    fn on_failure(&self, admission: Admission) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();

        match (state.state, admission) {
            (CircuitState::Closed, _) => {
                state.window.record(now, false);
                let (successes, failures) = state.window.counts(now);
                let total = successes + failures;
                if total >= self.config.min_samples {
                    let error_pct = failures as f64 * 100.0 / total as f64;
                    if error_pct > self.config.error_threshold_pct {
                        state.opened_at_ms = now;
                        self.transition(&mut state, CircuitState::Open, now);
                    }
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                state.trial_in_flight = false;
                state.opened_at_ms = now;
                self.transition(&mut state, CircuitState::Open, now);
            }
            _ => {
                // Already open, timeout keeps running from the original trip
            }
        }
    }

    /// Trial call dropped before completing; allow another trial
    fn on_abandoned(&self, admission: Admission) {
        if admission == Admission::Trial {
            let mut state = self.state.lock();
            if state.state == CircuitState::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState, now: i64) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        state.last_transition_ms = now;

        let (successes, failures) = state.window.counts(now);
        match to {
            CircuitState::Open => error!(
                "CircuitBreaker [{}]: Transitioning {:?} -> Open ({} failures / {} calls)",
                self.name,
                from,
                failures,
                successes + failures
            ),
            CircuitState::HalfOpen => info!(
                "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (reset timeout elapsed)",
                self.name
            ),
            CircuitState::Closed => info!(
                "CircuitBreaker [{}]: Transitioning {:?} -> Closed (trial succeeded)",
                self.name, from
            ),
        }

        // No receivers is fine
        let _ = self.transitions.send(CircuitTransition {
            name: self.name.clone(),
            from,
            to,
            at_ms: now,
        });
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let (success_count, failure_count) = state.window.counts(now);
        CircuitStats {
            state: state.state,
            failure_count,
            success_count,
            last_transition_ms: state.last_transition_ms,
        }
    }

    /// Subscribe to state transition notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitTransition> {
        self.transitions.subscribe()
    }
}

struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "CircuitBreaker [{}]: Call dropped before completion",
                self.breaker.name
            );
            self.breaker.on_abandoned(self.admission);
        }
    }
}

/// Error type for circuit breaker
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker [{name}] is open. Retry in {retry_in_ms}ms")]
    Open { name: String, retry_in_ms: u64 },

    #[error(transparent)]
    Inner(E),
}
