use crate::domain::errors::{BrokerError, PushError};
use crate::domain::events::BrokerMessage;
use async_trait::async_trait;

/// Source of wall-clock milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Compressed remote-write body ready to be POSTed
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub body: Vec<u8>,
    pub content_encoding: &'static str,
}

/// Status line of a completed push; any status is a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
    /// Raw `Retry-After` header, if the backend sent one
    pub retry_after: Option<String>,
}

impl PushResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            retry_after: None,
        }
    }
}

// Need async_trait for async functions in traits
#[async_trait]
pub trait RemoteWriteTransport: Send + Sync {
    /// Sends one payload. Returns `Err` only when no HTTP response was received.
    async fn send(&self, request: PushRequest) -> Result<PushResponse, PushError>;
}

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError>;
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
}
