use crate::config::{BrokerEnvConfig, Config, ObservabilityEnvConfig, TelemetryEnvConfig};
use crate::domain::errors::ConfigError;
use std::collections::HashMap;

fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
    let vars = env_map(pairs);
    Config::from_lookup(&|var| vars.get(var).cloned())
}

const REQUIRED: [(&str, &str); 2] = [
    ("GRAFANA_PUSH_URL", "https://prometheus.example.net/api/prom/push"),
    ("GRAFANA_API_KEY", "glc_secret"),
];

#[test]
fn test_defaults_with_required_credentials() {
    let config = load(&REQUIRED).unwrap();

    assert!(config.telemetry.enabled);
    assert_eq!(config.telemetry.push_interval_ms, 60_000);
    assert_eq!(config.telemetry.rate_limit_quota, 60);
    assert_eq!(config.telemetry.metrics_prefix, "pulse_flow_");
    assert_eq!(config.telemetry.environment, "development");
    assert!(config.telemetry.username.is_none());

    assert!(config.broker.url.is_none());
    assert_eq!(config.broker.queue_max_length, 10_000);
    assert_eq!(config.broker.max_retries, 3);
    assert_eq!(config.broker.retry_policy().initial_backoff_ms, 1000);
    assert_eq!(config.broker.breaker_config().min_samples, 5);

    assert!(config.observability.enabled);
    assert_eq!(config.observability.port, 9090);
    assert_eq!(config.shutdown_grace_ms, 5000);
}

#[test]
fn test_missing_push_url_is_fatal_when_enabled() {
    let result = load(&[("GRAFANA_API_KEY", "glc_secret")]);
    assert_eq!(
        result.unwrap_err(),
        ConfigError::Missing {
            var: "GRAFANA_PUSH_URL".to_string()
        }
    );

    let result = load(&[("GRAFANA_PUSH_URL", "https://prometheus.example.net/push")]);
    assert_eq!(
        result.unwrap_err(),
        ConfigError::Missing {
            var: "GRAFANA_API_KEY".to_string()
        }
    );
}

#[test]
fn test_disabled_telemetry_needs_no_credentials() {
    let config = load(&[("TELEMETRY_ENABLED", "false")]).unwrap();
    assert!(!config.telemetry.enabled);
}

#[test]
fn test_invalid_numbers_rejected() {
    let mut pairs = REQUIRED.to_vec();
    pairs.push(("METRICS_PUSH_INTERVAL", "soon"));
    assert_eq!(
        load(&pairs).unwrap_err(),
        ConfigError::Invalid {
            var: "METRICS_PUSH_INTERVAL".to_string(),
            value: "soon".to_string()
        }
    );

    let vars = env_map(&[("BREAKER_ERROR_THRESHOLD_PCT", "150")]);
    assert!(BrokerEnvConfig::from_lookup(&|var| vars.get(var).cloned()).is_err());
}

#[test]
fn test_environment_label_fallbacks() {
    let mut pairs = REQUIRED.to_vec();
    pairs.push(("NODE_ENV", "production"));
    pairs.push(("HOSTNAME", "worker-7"));
    let config = load(&pairs).unwrap();

    let labels = config.telemetry.default_labels();
    assert_eq!(labels.get("app").map(String::as_str), Some("pulse_flow"));
    assert_eq!(labels.get("environment").map(String::as_str), Some("production"));
    assert_eq!(labels.get("instance").map(String::as_str), Some("worker-7"));

    pairs.push(("APP_ENV", "staging"));
    assert_eq!(load(&pairs).unwrap().telemetry.environment, "staging");
}

#[test]
fn test_telemetry_overrides() {
    let vars = env_map(&[
        ("TELEMETRY_ENABLED", "true"),
        ("GRAFANA_PUSH_URL", "https://prometheus.example.net/push"),
        ("GRAFANA_USERNAME", "123456"),
        ("GRAFANA_API_KEY", "glc_secret"),
        ("METRICS_PUSH_INTERVAL", "15000"),
        ("METRICS_RATE_LIMIT_QUOTA", "4"),
    ]);
    let config = TelemetryEnvConfig::from_lookup(&|var| vars.get(var).cloned()).unwrap();

    assert_eq!(config.username.as_deref(), Some("123456"));
    assert_eq!(config.push_interval_ms, 15_000);
    assert_eq!(config.rate_limit_quota, 4);
}

#[test]
fn test_observability_bind_address_validated() {
    let vars = env_map(&[("OBSERVABILITY_BIND_ADDRESS", "not an address")]);
    assert!(ObservabilityEnvConfig::from_lookup(&|var| vars.get(var).cloned()).is_err());

    let vars = env_map(&[("OBSERVABILITY_PORT", "0")]);
    let config = ObservabilityEnvConfig::from_lookup(&|var| vars.get(var).cloned()).unwrap();
    assert_eq!(config.socket_addr().unwrap().port(), 0);
}
