use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod shutdown_service;

use crate::application::system::shutdown_service::ShutdownService;
use crate::config::{BrokerEnvConfig, Config};
use crate::domain::ports::{BrokerTransport, Clock, RemoteWriteTransport};
use crate::infrastructure::broker::{EventProducer, HealthCache, InMemoryBroker, RestProxyTransport};
use crate::infrastructure::core::circuit_breaker::CircuitTransition;
use crate::infrastructure::core::{CircuitBreaker, SystemClock};
use crate::infrastructure::observability::scrape::{self, ScrapeState};
use crate::infrastructure::observability::{
    HttpRemoteWriteClient, MetricRegistry, PipelineMetrics, PushAuth, RateLimiter,
    RemoteWriteEncoder, TelemetryPublisher,
};

/// Name of the breaker guarding broker publishes
pub const BROKER_BREAKER: &str = "broker";

/// Broker the producer publishes to
#[derive(Clone)]
pub enum BrokerBackend {
    InMemory(Arc<InMemoryBroker>),
    Remote(Arc<dyn BrokerTransport>),
}

impl BrokerBackend {
    pub fn from_config(config: &BrokerEnvConfig) -> Self {
        match &config.url {
            Some(url) => BrokerBackend::Remote(Arc::new(RestProxyTransport::new(
                url.clone(),
                Duration::from_millis(config.probe_timeout_ms),
            ))),
            None => BrokerBackend::InMemory(Arc::new(InMemoryBroker::new(config.queue_max_length))),
        }
    }

    pub fn transport(&self) -> Arc<dyn BrokerTransport> {
        match self {
            BrokerBackend::InMemory(broker) => broker.clone(),
            BrokerBackend::Remote(transport) => transport.clone(),
        }
    }
}

/// Every component of the pipeline, built explicitly from `Config`
pub struct TelemetryContext {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<MetricRegistry>,
    pub metrics: PipelineMetrics,
    pub rate_limiter: Arc<RateLimiter>,
    pub publisher: Option<Arc<TelemetryPublisher>>,
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthCache>,
    pub broker: BrokerBackend,
    pub producer: Arc<EventProducer>,
}

impl TelemetryContext {
    /// Production wiring: wall clock, HTTP remote write, broker from config
    pub fn build(config: Config) -> Result<Self> {
        config
            .telemetry
            .validate()
            .context("Invalid telemetry configuration")?;

        let remote_write: Option<Arc<dyn RemoteWriteTransport>> =
            match (&config.telemetry.push_url, &config.telemetry.api_key) {
                (Some(url), Some(api_key)) if config.telemetry.enabled => {
                    Some(Arc::new(HttpRemoteWriteClient::new(
                        url.clone(),
                        PushAuth::from_credentials(
                            config.telemetry.username.clone(),
                            api_key.clone(),
                        ),
                        Duration::from_millis(config.telemetry.push_timeout_ms),
                    )))
                }
                _ => None,
            };
        let broker = BrokerBackend::from_config(&config.broker);
        Self::build_with(config, Arc::new(SystemClock), remote_write, broker)
    }

    /// Wiring with injected clock and transports
    pub fn build_with(
        config: Config,
        clock: Arc<dyn Clock>,
        remote_write: Option<Arc<dyn RemoteWriteTransport>>,
        broker: BrokerBackend,
    ) -> Result<Self> {
        let registry = Arc::new(MetricRegistry::new(clock.clone()));
        let metrics = PipelineMetrics::register(&registry, &config.telemetry.metrics_prefix)
            .context("Failed to register pipeline metrics")?;

        let rate_limiter = Arc::new(RateLimiter::new(
            config.telemetry.rate_limit_quota,
            config.telemetry.rate_limit_window_ms,
        ));

        let publisher = match remote_write {
            Some(transport) if config.telemetry.enabled => Some(Arc::new(TelemetryPublisher::new(
                registry.clone(),
                metrics.clone(),
                RemoteWriteEncoder::new(config.telemetry.default_labels()),
                rate_limiter.clone(),
                transport,
                clock.clone(),
                Duration::from_millis(config.telemetry.push_interval_ms),
            ))),
            None if config.telemetry.enabled => {
                anyhow::bail!("Remote write is enabled but no transport was supplied")
            }
            _ => None,
        };

        let breaker = Arc::new(CircuitBreaker::new(
            BROKER_BREAKER,
            config.broker.breaker_config(),
            clock.clone(),
        ));
        registry
            .record(
                &metrics.circuit_breaker_state,
                breaker.state().as_gauge(),
                &[("breaker", BROKER_BREAKER)],
            )
            .context("Failed to initialise breaker gauge")?;

        let transport = broker.transport();
        let health = Arc::new(HealthCache::new(
            transport.clone(),
            clock.clone(),
            config.broker.health_cache_ttl_ms,
            Duration::from_millis(config.broker.probe_timeout_ms),
        ));
        let producer = Arc::new(
            EventProducer::new(
                transport,
                breaker.clone(),
                health.clone(),
                config.broker.retry_policy(),
                config.broker.max_consecutive_exhaustions,
            )
            .with_metrics(registry.clone(), metrics.broker_publish_total.clone()),
        );

        Ok(Self {
            config,
            clock,
            registry,
            metrics,
            rate_limiter,
            publisher,
            breaker,
            health,
            broker,
            producer,
        })
    }

    /// Spawns the publisher loop, the breaker gauge updater and the scrape server
    pub async fn start(self) -> Result<RunningSystem> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);

        let publisher_task = match &self.publisher {
            Some(publisher) => Some(publisher.clone().spawn(shutdown_rx.clone(), grace)),
            None => {
                info!("TelemetryContext: Remote write disabled");
                None
            }
        };

        let gauge_task = spawn_breaker_gauge(
            self.breaker.subscribe(),
            self.registry.clone(),
            self.metrics.circuit_breaker_state.clone(),
            shutdown_rx.clone(),
        );

        let (scrape_addr, scrape_task) = if self.config.observability.enabled {
            let bind = self.config.observability.socket_addr()?;
            let state = Arc::new(ScrapeState {
                registry: self.registry.clone(),
                health: self.health.clone(),
                clock: self.clock.clone(),
                started_at_ms: self.clock.now_ms(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                environment: self.config.telemetry.environment.clone(),
            });
            let (addr, task) = scrape::serve(bind, state, shutdown_rx.clone())
                .await
                .context("Failed to start scrape server")?;
            (Some(addr), Some(task))
        } else {
            info!("TelemetryContext: Scrape endpoint disabled");
            (None, None)
        };

        info!("TelemetryContext: Pipeline started");
        Ok(RunningSystem {
            context: self,
            shutdown_tx,
            publisher_task,
            scrape_task,
            scrape_addr,
            background: vec![gauge_task],
        })
    }
}

/// Mirrors breaker transitions into the state gauge
fn spawn_breaker_gauge(
    mut transitions: broadcast::Receiver<CircuitTransition>,
    registry: Arc<MetricRegistry>,
    gauge: String,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                transition = transitions.recv() => match transition {
                    Ok(t) => {
                        let labels = [("breaker", t.name.as_str())];
                        if let Err(e) = registry.record(&gauge, t.to.as_gauge(), &labels) {
                            debug!("BreakerGauge: Failed to record transition: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("BreakerGauge: Missed {} transitions", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Handle to a started pipeline
pub struct RunningSystem {
    pub context: TelemetryContext,
    shutdown_tx: watch::Sender<bool>,
    publisher_task: Option<JoinHandle<()>>,
    scrape_task: Option<JoinHandle<()>>,
    scrape_addr: Option<SocketAddr>,
    background: Vec<JoinHandle<()>>,
}

impl RunningSystem {
    pub fn producer(&self) -> Arc<EventProducer> {
        self.context.producer.clone()
    }

    pub fn registry(&self) -> Arc<MetricRegistry> {
        self.context.registry.clone()
    }

    /// Address the scrape server bound to, when enabled
    pub fn scrape_addr(&self) -> Option<SocketAddr> {
        self.scrape_addr
    }

    /// Receiver that flips to true once shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub async fn shutdown(self) {
        let grace = Duration::from_millis(self.context.config.shutdown_grace_ms);
        let service = ShutdownService::new(
            self.shutdown_tx,
            self.context.publisher.clone(),
            self.publisher_task,
            self.scrape_task,
            self.background,
            self.context.producer.clone(),
            grace,
        );
        service.shutdown().await;
    }
}
