//! Pulseflow Server - telemetry export and event publishing pipeline
//!
//! Pushes in-process metrics to a Prometheus remote-write endpoint, serves
//! `/metrics` and `/healthz`, and publishes domain events to the broker.
//!
//! # Usage
//! ```sh
//! GRAFANA_PUSH_URL=https://... GRAFANA_API_KEY=... cargo run --bin server
//! ```
//!
//! # Environment Variables
//! - `TELEMETRY_ENABLED` - Run the remote-write publisher (default: true)
//! - `METRICS_PUSH_INTERVAL` - Push interval in milliseconds (default: 60000)
//! - `BROKER_URL` - Kafka REST proxy base URL (default: in-memory broker)
//! - `OBSERVABILITY_PORT` - Scrape endpoint port (default: 9090)

use anyhow::Result;
use async_trait::async_trait;
use pulseflow::application::system::{BrokerBackend, TelemetryContext};
use pulseflow::config::Config;
use pulseflow::domain::events::BrokerMessage;
use pulseflow::infrastructure::broker::{EventConsumer, MessageHandler, ProducerStatus};
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

const EVENTS_TOPIC: &str = "tweet_processing";
const MAX_REDELIVERIES: u32 = 5;

/// Logs every consumed event
struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &BrokerMessage) -> Result<()> {
        let payload: serde_json::Value = serde_json::from_slice(&message.value)?;
        info!("Consumed event: {}", payload);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Pulseflow Server {} starting...", env!("CARGO_PKG_VERSION"));

    // Configuration errors are the only fatal startup errors
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Telemetry={}, Interval={}ms, Broker={}",
        config.telemetry.enabled,
        config.telemetry.push_interval_ms,
        config.broker.url.as_deref().unwrap_or("in-memory")
    );

    let context = TelemetryContext::build(config)?;
    let broker = context.broker.clone();
    let running = context.start().await?;

    if let BrokerBackend::InMemory(broker) = broker {
        broker.declare(EVENTS_TOPIC);
        let consumer = EventConsumer::new(
            broker.subscribe(EVENTS_TOPIC),
            Arc::new(LoggingHandler),
            MAX_REDELIVERIES,
        );
        consumer.spawn(running.shutdown_signal());
        info!("Consuming {} from the in-memory broker", EVENTS_TOPIC);
    }

    let mut status = running.producer().watch_status();
    info!("Server running. Press Ctrl+C to shutdown.");

    let fatal = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received.");
            false
        }
        _ = async {
            while status.changed().await.is_ok() {
                if let ProducerStatus::Fatal { reason } = &*status.borrow() {
                    error!("Event producer is fatal: {}", reason);
                    break;
                }
            }
        } => {
            error!("Shutting down after repeated broker failures.");
            true
        }
    };

    running.shutdown().await;
    if fatal {
        anyhow::bail!("event producer entered fatal state");
    }
    Ok(())
}
