use crate::domain::errors::PushError;
use crate::domain::ports::{PushRequest, PushResponse, RemoteWriteTransport};
use crate::infrastructure::core::HttpClientFactory;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use std::time::Duration;
use tracing::debug;

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
pub const REMOTE_WRITE_VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// Credentials for the remote-write endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAuth {
    Basic { username: String, api_key: String },
    Bearer { api_key: String },
}

impl PushAuth {
    /// Basic auth when a username is configured, bearer otherwise
    pub fn from_credentials(username: Option<String>, api_key: String) -> Self {
        match username {
            Some(username) if !username.is_empty() => PushAuth::Basic { username, api_key },
            _ => PushAuth::Bearer { api_key },
        }
    }
}

/// Remote-write transport over `reqwest`
pub struct HttpRemoteWriteClient {
    client: Client,
    url: String,
    auth: PushAuth,
    timeout: Duration,
}

impl HttpRemoteWriteClient {
    pub fn new(url: String, auth: PushAuth, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout),
            url,
            auth,
            timeout,
        }
    }

    fn map_error(&self, e: reqwest::Error) -> PushError {
        if e.is_timeout() {
            PushError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            }
        } else {
            PushError::Network {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl RemoteWriteTransport for HttpRemoteWriteClient {
    async fn send(&self, request: PushRequest) -> Result<PushResponse, PushError> {
        let builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .header(CONTENT_ENCODING, request.content_encoding)
            .header(REMOTE_WRITE_VERSION_HEADER, REMOTE_WRITE_VERSION)
            .body(request.body);

        let builder = match &self.auth {
            PushAuth::Basic { username, api_key } => builder.basic_auth(username, Some(api_key)),
            PushAuth::Bearer { api_key } => builder.bearer_auth(api_key),
        };

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!("HttpRemoteWriteClient: Push answered with HTTP {}", status);
        Ok(PushResponse {
            status,
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_selection() {
        assert_eq!(
            PushAuth::from_credentials(Some("12345".to_string()), "key".to_string()),
            PushAuth::Basic {
                username: "12345".to_string(),
                api_key: "key".to_string()
            }
        );
        assert_eq!(
            PushAuth::from_credentials(Some(String::new()), "key".to_string()),
            PushAuth::Bearer {
                api_key: "key".to_string()
            }
        );
        assert_eq!(
            PushAuth::from_credentials(None, "key".to_string()),
            PushAuth::Bearer {
                api_key: "key".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = HttpRemoteWriteClient::new(
            "http://127.0.0.1:1/api/prom/push".to_string(),
            PushAuth::Bearer {
                api_key: "key".to_string(),
            },
            Duration::from_secs(2),
        );
        let result = client
            .send(PushRequest {
                body: vec![],
                content_encoding: "snappy",
            })
            .await;
        assert!(matches!(
            result,
            Err(PushError::Network { .. }) | Err(PushError::Timeout { .. })
        ));
    }
}
