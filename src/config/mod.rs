//! Configuration module for Pulseflow.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Telemetry, Broker and Observability.

mod broker_config;
mod observability_config;
mod telemetry_config;

pub use broker_config::BrokerEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use telemetry_config::TelemetryEnvConfig;

use crate::domain::errors::ConfigError;
use std::env;
use std::str::FromStr;

/// Variable lookup; the process environment in production, a map in tests
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) fn process_env(var: &str) -> Option<String> {
    env::var(var).ok()
}

/// Trimmed, non-empty value of `var`
pub(crate) fn string_var(lookup: EnvLookup<'_>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_var<T: FromStr>(
    lookup: EnvLookup<'_>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match string_var(lookup, var) {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
    }
}

pub(crate) fn bool_var(
    lookup: EnvLookup<'_>,
    var: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match string_var(lookup, var) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var: var.to_string(),
                value,
            }),
        },
    }
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub telemetry: TelemetryEnvConfig,
    pub broker: BrokerEnvConfig,
    pub observability: ObservabilityEnvConfig,
    /// Bound on an in-flight push at shutdown
    pub shutdown_grace_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    /// Load configuration through `lookup`; validation errors are returned once, here.
    pub fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            telemetry: TelemetryEnvConfig::from_lookup(lookup)?,
            broker: BrokerEnvConfig::from_lookup(lookup)?,
            observability: ObservabilityEnvConfig::from_lookup(lookup)?,
            shutdown_grace_ms: parse_var(lookup, "SHUTDOWN_GRACE_MS", 5000)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telemetry: TelemetryEnvConfig::default(),
            broker: BrokerEnvConfig::default(),
            observability: ObservabilityEnvConfig::default(),
            shutdown_grace_ms: 5000,
        }
    }
}
