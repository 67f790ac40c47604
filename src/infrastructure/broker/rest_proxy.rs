use crate::domain::errors::BrokerError;
use crate::domain::events::BrokerMessage;
use crate::domain::ports::BrokerTransport;
use crate::infrastructure::core::HttpClientFactory;
use crate::infrastructure::core::http_client_factory::join_url;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const BINARY_CONTENT_TYPE: &str = "application/vnd.kafka.binary.v2+json";
pub const ACCEPT_CONTENT_TYPE: &str = "application/vnd.kafka.v2+json";

#[derive(Debug, Serialize)]
struct ProduceRecord {
    value: String,
}

#[derive(Debug, Serialize)]
struct ProduceRequest {
    records: Vec<ProduceRecord>,
}

impl ProduceRequest {
    fn from_messages(messages: &[BrokerMessage]) -> Self {
        Self {
            records: messages
                .iter()
                .map(|m| ProduceRecord {
                    value: STANDARD.encode(&m.value),
                })
                .collect(),
        }
    }
}

/// Broker transport over a Kafka REST proxy (v2 API)
pub struct RestProxyTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RestProxyTransport {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout),
            base_url,
            timeout,
        }
    }

    /// Produce endpoint for `topic`, escaped as a single path segment
    fn topic_url(&self, topic: &str) -> Result<Url, BrokerError> {
        let invalid = |reason: String| BrokerError::Connection {
            reason: format!("invalid proxy URL '{}': {}", self.base_url, reason),
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot be a base".to_string()))?
            .pop_if_empty()
            .push("topics")
            .push(topic);
        Ok(url)
    }

    fn map_error(&self, e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            }
        } else {
            BrokerError::Connection {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl BrokerTransport for RestProxyTransport {
    async fn connect(&self) -> Result<(), BrokerError> {
        // Stateless over HTTP
        Ok(())
    }

    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        let url = self.topic_url(topic)?;
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, BINARY_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, ACCEPT_CONTENT_TYPE)
            .json(&ProduceRequest::from_messages(messages))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status.is_success() {
            debug!(
                "RestProxyTransport: Produced {} record(s) to {}",
                messages.len(),
                topic
            );
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BrokerError::UnknownTopic {
                topic: topic.to_string(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(BrokerError::Send {
            topic: topic.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let url = join_url(&self.base_url, "topics");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, ACCEPT_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(BrokerError::Connection {
                reason: format!("topic listing returned HTTP {}", response.status().as_u16()),
            });
        }
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| BrokerError::Connection {
                reason: format!("invalid topic listing: {}", e),
            })
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_base64() {
        let request = ProduceRequest::from_messages(&[BrokerMessage::from("{\"id\":1}")]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["records"][0]["value"], "eyJpZCI6MX0=");
    }

    #[test]
    fn test_topic_is_escaped_as_one_segment() {
        let transport =
            RestProxyTransport::new("http://proxy:8082/".to_string(), Duration::from_secs(2));
        assert_eq!(
            transport.topic_url("tweet_processing").unwrap().as_str(),
            "http://proxy:8082/topics/tweet_processing"
        );
        assert_eq!(
            transport.topic_url("a/b c?x#y").unwrap().as_str(),
            "http://proxy:8082/topics/a%2Fb%20c%3Fx%23y"
        );

        let nested =
            RestProxyTransport::new("http://proxy:8082/kafka".to_string(), Duration::from_secs(2));
        assert_eq!(
            nested.topic_url("../admin").unwrap().as_str(),
            "http://proxy:8082/kafka/topics/..%2Fadmin"
        );
    }

    #[test]
    fn test_unparseable_proxy_url_is_connection_error() {
        let transport = RestProxyTransport::new("not a url".to_string(), Duration::from_secs(2));
        assert!(matches!(
            transport.topic_url("events"),
            Err(BrokerError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_connection_error() {
        let transport =
            RestProxyTransport::new("http://127.0.0.1:1".to_string(), Duration::from_secs(2));
        let result = transport.list_topics().await;
        assert!(matches!(
            result,
            Err(BrokerError::Connection { .. }) | Err(BrokerError::Timeout { .. })
        ));
    }
}
