use thiserror::Error;

/// Errors raised when metric input is rejected at the registry boundary
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown metric: {name}")]
    UnknownMetric { name: String },

    #[error("Metric {name} is already registered")]
    AlreadyRegistered { name: String },

    #[error("Duplicate label key '{key}' for metric {name}")]
    DuplicateLabel { name: String, key: String },

    #[error("Label set for {name} does not match schema: expected {expected:?}, got {actual:?}")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Counter {name} cannot decrease (increment {value})")]
    NegativeIncrement { name: String, value: f64 },

    #[error("Non-finite value {value} for metric {name}")]
    NonFinite { name: String, value: f64 },

    #[error("Invalid metric definition for {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },
}

/// Errors raised while turning a snapshot into the remote-write payload
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Sample {name} has non-finite value {value}")]
    NonFiniteValue { name: String, value: f64 },

    #[error("Payload failed schema verification: {reason}")]
    SchemaViolation { reason: String },
}

/// Codec-internal compression failure
#[derive(Debug, Error)]
#[error("Compression failed: {0}")]
pub struct CompressionError(#[from] pub snap::Error);

/// Failures of a single remote-write HTTP attempt
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PushError {
    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Transport-level broker failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Broker connection failed: {reason}")]
    Connection { reason: String },

    #[error("Send to topic {topic} failed: {reason}")]
    Send { topic: String, reason: String },

    #[error("Queue for topic {topic} is full ({capacity} messages), publish rejected")]
    QueueFull { topic: String, capacity: usize },

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Broker operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Errors surfaced to callers of the domain-event producer
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    #[error("Circuit breaker [{name}] is open, retry in {retry_in_ms}ms")]
    CircuitOpen { name: String, retry_in_ms: u64 },

    #[error("Broker reported unhealthy at {checked_at_ms}: {reason}")]
    Unhealthy { checked_at_ms: i64, reason: String },

    #[error("Publish failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: BrokerError,
    },

    #[error("Producer is in fatal state: {reason}")]
    Fatal { reason: String },

    #[error("Invalid publish request: {reason}")]
    Invalid { reason: String },
}

/// Startup-time configuration errors; these are the only fatal errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration: {var}")]
    Missing { var: String },

    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: String, value: String },
}
