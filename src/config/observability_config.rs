//! Observability configuration parsing from environment variables.
//!
//! This module handles loading the scrape endpoint configuration.

use super::{EnvLookup, bool_var, parse_var, process_env, string_var};
use crate::domain::errors::ConfigError;
use std::net::SocketAddr;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub port: u16,
    pub bind_address: String,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let config = Self {
            enabled: bool_var(lookup, "OBSERVABILITY_ENABLED", true)?,
            port: parse_var(lookup, "OBSERVABILITY_PORT", 9090)?,
            bind_address: string_var(lookup, "OBSERVABILITY_BIND_ADDRESS")
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        };
        config.socket_addr()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                var: "OBSERVABILITY_BIND_ADDRESS".to_string(),
                value: self.bind_address.clone(),
            })
    }
}
