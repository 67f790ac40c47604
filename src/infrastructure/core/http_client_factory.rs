use reqwest::Client;
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates the shared HTTP client.
    ///
    /// No retry layer: failed pushes are retried by the next scheduled
    /// cycle, broker sends by the producer's bounded retry loop.
    pub fn create_client(request_timeout: Duration) -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10).min(request_timeout))
            .user_agent(user_agent())
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}

pub fn user_agent() -> String {
    format!("pulseflow/{}", env!("CARGO_PKG_VERSION"))
}

/// Joins a base URL and a path without doubling or dropping the separator.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://proxy:8082/", "/topics"),
            "http://proxy:8082/topics"
        );
        assert_eq!(
            join_url("http://proxy:8082", "topics/events"),
            "http://proxy:8082/topics/events"
        );
    }

    #[test]
    fn test_user_agent_carries_version() {
        assert!(user_agent().starts_with("pulseflow/"));
    }
}
