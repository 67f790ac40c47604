use serde::Serialize;

/// A single broker record. Only the value bytes are meaningful to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub value: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Serializes a domain payload as a JSON record
    pub fn json<T: Serialize>(payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            value: serde_json::to_vec(payload)?,
        })
    }
}

impl From<&str> for BrokerMessage {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}
