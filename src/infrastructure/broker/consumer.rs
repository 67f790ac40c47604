use crate::domain::events::BrokerMessage;
use crate::infrastructure::broker::in_memory::{Delivery, Subscription};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &BrokerMessage) -> anyhow::Result<()>;
}

/// Delivery outcomes seen by a consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub acked: AtomicU64,
    pub requeued: AtomicU64,
    pub dropped: AtomicU64,
}

/// Runs a handler over one subscription: ack on success, requeue on failure,
/// drop once a message exceeds its redelivery budget.
pub struct EventConsumer {
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    max_redeliveries: u32,
    stats: Arc<ConsumerStats>,
}

impl EventConsumer {
    pub fn new(
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
        max_redeliveries: u32,
    ) -> Self {
        Self {
            subscription,
            handler,
            max_redeliveries,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    async fn process(&self, delivery: Delivery) {
        match self.handler.handle(delivery.message()).await {
            Ok(()) => {
                delivery.ack();
                self.stats.acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if delivery.redeliveries() >= self.max_redeliveries => {
                error!(
                    "EventConsumer [{}]: Dropping message after {} redeliveries: {}",
                    delivery.topic(),
                    delivery.redeliveries(),
                    e
                );
                delivery.nack(false);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    "EventConsumer [{}]: Handler failed, requeueing: {}",
                    delivery.topic(),
                    e
                );
                delivery.nack(true);
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Consumes until `shutdown` flips to true
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "EventConsumer [{}]: Started",
                self.subscription.topic()
            );
            loop {
                tokio::select! {
                    delivery = self.subscription.recv() => self.process(delivery).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(
                "EventConsumer [{}]: Stopped",
                self.subscription.topic()
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::BrokerTransport;
    use crate::infrastructure::broker::in_memory::InMemoryBroker;
    use std::time::Duration;

    struct FailingFirst {
        failures_left: AtomicU64,
        seen: parking_lot::Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MessageHandler for FailingFirst {
        async fn handle(&self, message: &BrokerMessage) -> anyhow::Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transient handler failure");
            }
            self.seen.lock().push(message.value.clone());
            Ok(())
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_failed_message_is_redelivered() {
        let broker = InMemoryBroker::new(10);
        let handler = Arc::new(FailingFirst {
            failures_left: AtomicU64::new(1),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let consumer = EventConsumer::new(broker.subscribe("events"), handler.clone(), 3);
        let stats = consumer.stats();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        broker.send("events", &[BrokerMessage::from("a")]).await.unwrap();
        wait_for(|| stats.acked.load(Ordering::SeqCst) == 1).await;

        assert_eq!(stats.requeued.load(Ordering::SeqCst), 1);
        assert_eq!(handler.seen.lock().as_slice(), &[b"a".to_vec()]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poison_message_dropped() {
        let broker = InMemoryBroker::new(10);
        let handler = Arc::new(FailingFirst {
            failures_left: AtomicU64::new(u64::MAX),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let consumer = EventConsumer::new(broker.subscribe("events"), handler, 2);
        let stats = consumer.stats();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        broker.send("events", &[BrokerMessage::from("poison")]).await.unwrap();
        wait_for(|| stats.dropped.load(Ordering::SeqCst) == 1).await;

        assert_eq!(stats.requeued.load(Ordering::SeqCst), 2);
        assert_eq!(broker.depth("events"), 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
