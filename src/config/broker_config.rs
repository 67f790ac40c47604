//! Message broker configuration parsing from environment variables.
//!
//! Covers the transport, the health cache, the circuit breaker and the
//! producer retry policy.

use super::{EnvLookup, parse_var, process_env, string_var};
use crate::domain::errors::ConfigError;
use crate::infrastructure::broker::RetryPolicy;
use crate::infrastructure::core::CircuitBreakerConfig;

/// Broker environment configuration
#[derive(Debug, Clone)]
pub struct BrokerEnvConfig {
    /// REST proxy base URL; the in-memory broker is used when absent
    pub url: Option<String>,
    pub probe_timeout_ms: u64,
    pub queue_max_length: usize,
    pub health_cache_ttl_ms: u64,
    pub breaker_error_threshold_pct: f64,
    pub breaker_min_samples: u32,
    pub breaker_reset_timeout_ms: u64,
    pub breaker_rolling_window_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub max_consecutive_exhaustions: u32,
}

impl Default for BrokerEnvConfig {
    fn default() -> Self {
        Self {
            url: None,
            probe_timeout_ms: 5000,
            queue_max_length: 10_000,
            health_cache_ttl_ms: 30_000,
            breaker_error_threshold_pct: 50.0,
            breaker_min_samples: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_rolling_window_ms: 10_000,
            max_retries: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            max_consecutive_exhaustions: 3,
        }
    }
}

impl BrokerEnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            url: string_var(lookup, "BROKER_URL"),
            probe_timeout_ms: parse_var(lookup, "BROKER_PROBE_TIMEOUT_MS", d.probe_timeout_ms)?,
            queue_max_length: parse_var(lookup, "BROKER_QUEUE_MAX_LENGTH", d.queue_max_length)?,
            health_cache_ttl_ms: parse_var(lookup, "HEALTH_CACHE_TTL_MS", d.health_cache_ttl_ms)?,
            breaker_error_threshold_pct: parse_var(
                lookup,
                "BREAKER_ERROR_THRESHOLD_PCT",
                d.breaker_error_threshold_pct,
            )?,
            breaker_min_samples: parse_var(lookup, "BREAKER_MIN_SAMPLES", d.breaker_min_samples)?,
            breaker_reset_timeout_ms: parse_var(
                lookup,
                "BREAKER_RESET_TIMEOUT_MS",
                d.breaker_reset_timeout_ms,
            )?,
            breaker_rolling_window_ms: parse_var(
                lookup,
                "BREAKER_ROLLING_WINDOW_MS",
                d.breaker_rolling_window_ms,
            )?,
            max_retries: parse_var(lookup, "BROKER_MAX_RETRIES", d.max_retries)?,
            initial_backoff_ms: parse_var(
                lookup,
                "BROKER_INITIAL_BACKOFF_MS",
                d.initial_backoff_ms,
            )?,
            backoff_multiplier: parse_var(
                lookup,
                "BROKER_BACKOFF_MULTIPLIER",
                d.backoff_multiplier,
            )?,
            max_backoff_ms: parse_var(lookup, "BROKER_MAX_BACKOFF_MS", d.max_backoff_ms)?,
            max_consecutive_exhaustions: parse_var(
                lookup,
                "BROKER_MAX_CONSECUTIVE_EXHAUSTIONS",
                d.max_consecutive_exhaustions,
            )?,
        };

        if !(0.0..=100.0).contains(&config.breaker_error_threshold_pct) {
            return Err(ConfigError::Invalid {
                var: "BREAKER_ERROR_THRESHOLD_PCT".to_string(),
                value: config.breaker_error_threshold_pct.to_string(),
            });
        }
        if let Some(url) = &config.url {
            if url::Url::parse(url).is_err() {
                return Err(ConfigError::Invalid {
                    var: "BROKER_URL".to_string(),
                    value: url.clone(),
                });
            }
        }
        Ok(config)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold_pct: self.breaker_error_threshold_pct,
            min_samples: self.breaker_min_samples,
            reset_timeout_ms: self.breaker_reset_timeout_ms,
            rolling_window_ms: self.breaker_rolling_window_ms,
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff_ms: self.initial_backoff_ms,
            multiplier: self.backoff_multiplier,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}
