use async_trait::async_trait;
use parking_lot::Mutex;
use pulseflow::domain::errors::{BrokerError, PublishError};
use pulseflow::domain::events::BrokerMessage;
use pulseflow::domain::ports::BrokerTransport;
use pulseflow::infrastructure::broker::{
    EventConsumer, EventProducer, HealthCache, InMemoryBroker, MessageHandler, ProducerStatus,
    RetryPolicy,
};
use pulseflow::infrastructure::core::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, ManualClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

const TOPIC: &str = "tweet_processing";
const HEALTH_TTL_MS: u64 = 30_000;

fn breaker_config(min_samples: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        error_threshold_pct: 50.0,
        min_samples,
        reset_timeout_ms: 30_000,
        rolling_window_ms: 10_000,
        rolling_buckets: 10,
    }
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff_ms: 1,
        multiplier: 2.0,
        max_backoff_ms: 5,
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    broker: Arc<InMemoryBroker>,
    health: Arc<HealthCache>,
    producer: EventProducer,
}

fn harness(min_samples: u32, policy: RetryPolicy, max_exhaustions: u32) -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let broker = Arc::new(InMemoryBroker::new(100));
    let transport: Arc<dyn BrokerTransport> = broker.clone();
    let breaker = Arc::new(CircuitBreaker::new(
        "broker",
        breaker_config(min_samples),
        clock.clone(),
    ));
    let health = Arc::new(HealthCache::new(
        transport.clone(),
        clock.clone(),
        HEALTH_TTL_MS,
        Duration::from_millis(100),
    ));
    let producer = EventProducer::new(transport, breaker, health.clone(), policy, max_exhaustions);
    Harness {
        clock,
        broker,
        health,
        producer,
    }
}

fn send_failure() -> BrokerError {
    BrokerError::Send {
        topic: TOPIC.to_string(),
        reason: "leader not available".to_string(),
    }
}

#[tokio::test]
async fn test_breaker_opens_and_recovers_after_trial() {
    let clock = Arc::new(ManualClock::new(0));
    let breaker = CircuitBreaker::new("broker", breaker_config(4), clock.clone());

    for _ in 0..2 {
        breaker.call(async { Ok::<_, BrokerError>(()) }).await.unwrap();
    }
    for _ in 0..3 {
        let result = breaker.call(async { Err::<(), _>(send_failure()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.call(async { Ok::<_, BrokerError>(()) }).await;
    assert!(matches!(rejected, Err(CircuitBreakerError::Open { .. })));

    clock.advance(30_000);
    breaker.call(async { Ok::<_, BrokerError>(()) }).await.unwrap();

    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = harness(100, fast_retries(3), 3);
    h.broker.fail_next_sends(2, send_failure());

    assert_ok!(
        h.producer
            .publish(TOPIC, &[BrokerMessage::from("tweet-1")])
            .await
    );

    assert_eq!(h.broker.send_attempts(), 3);
    assert_eq!(h.broker.depth(TOPIC), 1);
    assert_eq!(h.producer.status(), ProducerStatus::Ready);
}

#[tokio::test]
async fn test_open_breaker_stops_retries() {
    let h = harness(2, fast_retries(3), 3);
    h.broker.fail_next_sends(10, send_failure());

    let err = assert_err!(
        h.producer
            .publish(TOPIC, &[BrokerMessage::from("tweet-1")])
            .await
    );

    assert!(matches!(err, PublishError::CircuitOpen { .. }));
    assert_eq!(h.broker.send_attempts(), 2);
    assert_eq!(h.producer.breaker().state(), CircuitState::Open);
}

#[tokio::test]
async fn test_health_verdict_reused_within_ttl() {
    let h = harness(100, fast_retries(0), 3);

    h.producer
        .publish(TOPIC, &[BrokerMessage::from("a")])
        .await
        .unwrap();
    let first = h.health.cached().expect("probed on first publish");

    h.clock.advance(10_000);
    h.producer
        .publish(TOPIC, &[BrokerMessage::from("b")])
        .await
        .unwrap();
    assert_eq!(h.health.cached().unwrap().last_checked_ms, first.last_checked_ms);

    h.clock.advance(HEALTH_TTL_MS as i64);
    h.producer
        .publish(TOPIC, &[BrokerMessage::from("c")])
        .await
        .unwrap();
    let refreshed = h.health.cached().unwrap();
    assert!(refreshed.last_checked_ms > first.last_checked_ms);
    assert_eq!(h.broker.depth(TOPIC), 3);
}

#[tokio::test]
async fn test_unhealthy_broker_fails_fast() {
    let h = harness(100, fast_retries(3), 3);
    h.broker.set_unreachable(true);

    let err = h
        .producer
        .publish(TOPIC, &[BrokerMessage::from("a")])
        .await
        .unwrap_err();

    match err {
        PublishError::Unhealthy { reason, .. } => assert!(reason.contains("unreachable")),
        other => panic!("expected Unhealthy, got {:?}", other),
    }
    assert_eq!(h.broker.send_attempts(), 0);
}

#[tokio::test]
async fn test_repeated_exhaustion_is_fatal_until_reset() {
    let h = harness(100, fast_retries(0), 2);
    h.broker.fail_next_sends(2, send_failure());

    for _ in 0..2 {
        let err = h
            .producer
            .publish(TOPIC, &[BrokerMessage::from("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::RetriesExhausted { attempts: 1, .. }));
    }
    assert!(matches!(h.producer.status(), ProducerStatus::Fatal { .. }));

    let err = h
        .producer
        .publish(TOPIC, &[BrokerMessage::from("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Fatal { .. }));
    assert_eq!(h.broker.send_attempts(), 2);

    h.producer.reset();
    assert_eq!(h.producer.status(), ProducerStatus::Ready);
    assert_ok!(h.producer.publish(TOPIC, &[BrokerMessage::from("a")]).await);
}

struct Collecting {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageHandler for Collecting {
    async fn handle(&self, message: &BrokerMessage) -> anyhow::Result<()> {
        self.seen
            .lock()
            .push(String::from_utf8_lossy(&message.value).into_owned());
        Ok(())
    }
}

#[tokio::test]
async fn test_published_events_reach_consumer() {
    let h = harness(100, fast_retries(0), 3);
    let handler = Arc::new(Collecting {
        seen: Mutex::new(Vec::new()),
    });
    let consumer = EventConsumer::new(h.broker.subscribe(TOPIC), handler.clone(), 3);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = consumer.spawn(shutdown_rx);

    h.producer
        .publish(
            TOPIC,
            &[BrokerMessage::from("first"), BrokerMessage::from("second")],
        )
        .await
        .unwrap();

    for _ in 0..200 {
        if handler.seen.lock().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(handler.seen.lock().as_slice(), &["first", "second"]);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
