//! Remote-write telemetry configuration parsing from environment variables.

use super::{EnvLookup, bool_var, parse_var, process_env, string_var};
use crate::domain::errors::ConfigError;
use crate::domain::metrics::{Labels, labels};

/// Telemetry environment configuration
#[derive(Debug, Clone)]
pub struct TelemetryEnvConfig {
    pub enabled: bool,
    pub push_url: Option<String>,
    pub username: Option<String>,
    pub api_key: Option<String>,
    pub push_interval_ms: u64,
    pub push_timeout_ms: u64,
    pub rate_limit_quota: u32,
    pub rate_limit_window_ms: u64,
    pub metrics_prefix: String,
    pub app_name: String,
    pub environment: String,
    pub instance: String,
}

impl Default for TelemetryEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            push_url: None,
            username: None,
            api_key: None,
            push_interval_ms: 60_000,
            push_timeout_ms: 10_000,
            rate_limit_quota: 60,
            rate_limit_window_ms: 60_000,
            metrics_prefix: "pulse_flow_".to_string(),
            app_name: "pulse_flow".to_string(),
            environment: "development".to_string(),
            instance: "unknown".to_string(),
        }
    }
}

impl TelemetryEnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            enabled: bool_var(lookup, "TELEMETRY_ENABLED", defaults.enabled)?,
            push_url: string_var(lookup, "GRAFANA_PUSH_URL"),
            username: string_var(lookup, "GRAFANA_USERNAME"),
            api_key: string_var(lookup, "GRAFANA_API_KEY"),
            push_interval_ms: parse_var(
                lookup,
                "METRICS_PUSH_INTERVAL",
                defaults.push_interval_ms,
            )?,
            push_timeout_ms: parse_var(
                lookup,
                "METRICS_PUSH_TIMEOUT_MS",
                defaults.push_timeout_ms,
            )?,
            rate_limit_quota: parse_var(
                lookup,
                "METRICS_RATE_LIMIT_QUOTA",
                defaults.rate_limit_quota,
            )?,
            rate_limit_window_ms: parse_var(
                lookup,
                "METRICS_RATE_LIMIT_WINDOW_MS",
                defaults.rate_limit_window_ms,
            )?,
            metrics_prefix: string_var(lookup, "METRICS_PREFIX").unwrap_or(defaults.metrics_prefix),
            app_name: string_var(lookup, "APP_NAME").unwrap_or(defaults.app_name),
            environment: string_var(lookup, "APP_ENV")
                .or_else(|| string_var(lookup, "NODE_ENV"))
                .unwrap_or(defaults.environment),
            instance: string_var(lookup, "HOSTNAME").unwrap_or(defaults.instance),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the interval and, when enabled, the push URL and API key
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.push_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "METRICS_PUSH_INTERVAL".to_string(),
                value: "0".to_string(),
            });
        }
        if !self.enabled {
            return Ok(());
        }

        let push_url = self.push_url.as_deref().ok_or_else(|| ConfigError::Missing {
            var: "GRAFANA_PUSH_URL".to_string(),
        })?;
        if url::Url::parse(push_url).is_err() {
            return Err(ConfigError::Invalid {
                var: "GRAFANA_PUSH_URL".to_string(),
                value: push_url.to_string(),
            });
        }
        if self.api_key.is_none() {
            return Err(ConfigError::Missing {
                var: "GRAFANA_API_KEY".to_string(),
            });
        }
        Ok(())
    }

    /// Process-wide labels merged into every pushed series
    pub fn default_labels(&self) -> Labels {
        labels(&[
            ("app", self.app_name.as_str()),
            ("environment", self.environment.as_str()),
            ("instance", self.instance.as_str()),
        ])
    }
}
