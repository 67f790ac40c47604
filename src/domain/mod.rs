// Domain-specific error types
pub mod errors;

// Broker records
pub mod events;

// Metric samples and snapshots
pub mod metrics;

// Port interfaces
pub mod ports;
