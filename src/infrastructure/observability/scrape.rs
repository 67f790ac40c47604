use crate::domain::ports::Clock;
use crate::infrastructure::broker::health_cache::{HealthCache, HealthCacheEntry};
use crate::infrastructure::observability::metrics::MetricRegistry;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared state of the scrape endpoints
pub struct ScrapeState {
    pub registry: Arc<MetricRegistry>,
    pub health: Arc<HealthCache>,
    pub clock: Arc<dyn Clock>,
    pub started_at_ms: i64,
    pub version: String,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    #[serde(flatten)]
    pub entry: HealthCacheEntry,
}

#[derive(Debug, Serialize)]
pub struct ServicesHealth {
    pub broker: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: String,
    pub environment: String,
    pub timestamp: String,
    pub uptime: f64,
    pub services: ServicesHealth,
}

pub fn router(state: Arc<ScrapeState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<Arc<ScrapeState>>) -> Response {
    match state.registry.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, state.registry.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("ScrapeServer: Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<ScrapeState>>) -> (StatusCode, Json<HealthReport>) {
    let entry = state.health.get_health(false).await;
    let now = state.clock.now_ms();
    let healthy = entry.is_healthy;

    let report = HealthReport {
        status: if healthy { "ok" } else { "error" },
        version: state.version.clone(),
        environment: state.environment.clone(),
        timestamp: chrono::DateTime::from_timestamp_millis(now)
            .unwrap_or_default()
            .to_rfc3339(),
        uptime: (now - state.started_at_ms).max(0) as f64 / 1000.0,
        services: ServicesHealth {
            broker: ServiceHealth {
                status: if healthy { "healthy" } else { "unhealthy" },
                entry,
            },
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Binds the scrape server and serves until `shutdown` flips to true
pub async fn serve(
    bind: SocketAddr,
    state: Arc<ScrapeState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!("ScrapeServer: Serving /metrics and /healthz on {}", local_addr);

    let handle = tokio::spawn(async move {
        let stopped = async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, router(state))
            .with_graceful_shutdown(stopped)
            .await
        {
            error!("ScrapeServer: Server error: {}", e);
        }
        info!("ScrapeServer: Stopped");
    });

    Ok((local_addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::BrokerTransport;
    use crate::infrastructure::broker::in_memory::InMemoryBroker;
    use crate::infrastructure::core::clock::ManualClock;
    use std::time::Duration;

    fn state(broker: Arc<InMemoryBroker>) -> Arc<ScrapeState> {
        let clock = Arc::new(ManualClock::new(90_000));
        let registry = Arc::new(MetricRegistry::new(clock.clone()));
        registry
            .register_counter("pulse_flow_tweets_total", "Tweets", &["status"])
            .unwrap();
        registry
            .inc("pulse_flow_tweets_total", &[("status", "created")])
            .unwrap();
        let transport: Arc<dyn BrokerTransport> = broker;
        Arc::new(ScrapeState {
            registry,
            health: Arc::new(HealthCache::new(
                transport,
                clock.clone(),
                30_000,
                Duration::from_millis(100),
            )),
            clock,
            started_at_ms: 30_000,
            version: "0.4.2".to_string(),
            environment: "test".to_string(),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = metrics_handler(State(state(Arc::new(InMemoryBroker::new(10))))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("pulse_flow_tweets_total{status=\"created\"} 1"));
    }

    #[tokio::test]
    async fn test_healthz_ok() {
        let (status, Json(report)) =
            health_handler(State(state(Arc::new(InMemoryBroker::new(10))))).await;
        assert_eq!(status, StatusCode::OK);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["uptime"], 60.0);
        assert_eq!(json["services"]["broker"]["status"], "healthy");
        assert_eq!(json["services"]["broker"]["is_healthy"], true);
    }

    #[tokio::test]
    async fn test_healthz_unhealthy_broker() {
        let broker = Arc::new(InMemoryBroker::new(10));
        broker.set_unreachable(true);

        let response = health_handler(State(state(broker))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert!(json["services"]["broker"]["details"]["error"]
            .as_str()
            .unwrap()
            .contains("unreachable"));
    }
}
