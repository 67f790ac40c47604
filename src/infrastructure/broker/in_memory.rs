use crate::domain::errors::BrokerError;
use crate::domain::events::BrokerMessage;
use crate::domain::ports::BrokerTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug)]
struct Queued {
    message: BrokerMessage,
    redeliveries: u32,
}

/// Bounded FIFO queue behind one topic
struct Topic {
    name: String,
    capacity: usize,
    ready: Mutex<VecDeque<Queued>>,
    available: Notify,
}

impl Topic {
    fn requeue(&self, queued: Queued) {
        // Requeued messages bypass the length limit
        self.ready.lock().push_front(queued);
        self.available.notify_one();
    }
}

/// In-process broker with bounded topics and at-least-once deliveries.
///
/// Overflow rejects the publish (no head drop). Faults can be injected to
/// exercise the producer's retry and breaker paths.
pub struct InMemoryBroker {
    capacity: usize,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    unreachable: AtomicBool,
    failing_sends: Mutex<VecDeque<BrokerError>>,
    sends: AtomicU64,
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            failing_sends: Mutex::new(VecDeque::new()),
            sends: AtomicU64::new(0),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Topic {
                    name: name.to_string(),
                    capacity: self.capacity,
                    ready: Mutex::new(VecDeque::new()),
                    available: Notify::new(),
                })
            })
            .clone()
    }

    /// Declares a topic up-front (publishing also declares it)
    pub fn declare(&self, name: &str) {
        self.topic(name);
    }

    /// Ready (undelivered) messages in `topic`
    pub fn depth(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.ready.lock().len())
            .unwrap_or(0)
    }

    /// Successful and failed send attempts seen so far
    pub fn send_attempts(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        Subscription {
            topic: self.topic(topic),
        }
    }

    /// Every operation fails with a connection error while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// The next `count` sends fail with `error`
    pub fn fail_next_sends(&self, count: usize, error: BrokerError) {
        let mut failing = self.failing_sends.lock();
        failing.extend(std::iter::repeat_n(error, count));
    }

    fn check_reachable(&self) -> Result<(), BrokerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection {
                reason: "broker unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.check_reachable()
    }

    async fn send(&self, topic: &str, messages: &[BrokerMessage]) -> Result<(), BrokerError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if let Some(error) = self.failing_sends.lock().pop_front() {
            return Err(error);
        }

        let topic = self.topic(topic);
        {
            let mut ready = topic.ready.lock();
            if ready.len() + messages.len() > topic.capacity {
                warn!(
                    "InMemoryBroker: Topic {} full ({} messages), rejecting publish",
                    topic.name, topic.capacity
                );
                return Err(BrokerError::QueueFull {
                    topic: topic.name.clone(),
                    capacity: topic.capacity,
                });
            }
            ready.extend(messages.iter().cloned().map(|message| Queued {
                message,
                redeliveries: 0,
            }));
        }
        for _ in messages {
            topic.available.notify_one();
        }
        debug!(
            "InMemoryBroker: Queued {} message(s) on {}",
            messages.len(),
            topic.name
        );
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        self.check_reachable()?;
        let mut names: Vec<String> = self.topics.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Competing-consumer handle on one topic
pub struct Subscription {
    topic: Arc<Topic>,
}

impl Subscription {
    /// Waits for the next ready message
    pub async fn recv(&self) -> Delivery {
        loop {
            if let Some(queued) = self.try_pop() {
                return Delivery::new(self.topic.clone(), queued);
            }
            self.topic.available.notified().await;
        }
    }

    /// Next ready message without waiting
    pub fn try_recv(&self) -> Option<Delivery> {
        self.try_pop()
            .map(|queued| Delivery::new(self.topic.clone(), queued))
    }

    fn try_pop(&self) -> Option<Queued> {
        self.topic.ready.lock().pop_front()
    }

    pub fn topic(&self) -> &str {
        &self.topic.name
    }
}

/// A message handed to a consumer; dropping it unsettled requeues it
pub struct Delivery {
    topic: Arc<Topic>,
    message: BrokerMessage,
    redeliveries: u32,
    settled: bool,
}

impl Delivery {
    fn new(topic: Arc<Topic>, queued: Queued) -> Self {
        Self {
            topic,
            message: queued.message,
            redeliveries: queued.redeliveries,
            settled: false,
        }
    }

    pub fn message(&self) -> &BrokerMessage {
        &self.message
    }

    /// Times this message was requeued before this delivery
    pub fn redeliveries(&self) -> u32 {
        self.redeliveries
    }

    pub fn topic(&self) -> &str {
        &self.topic.name
    }

    pub fn ack(mut self) {
        self.settled = true;
    }

    /// Rejects the message, optionally putting it back at the head of the queue
    pub fn nack(mut self, requeue: bool) {
        if requeue {
            self.requeue();
        }
        self.settled = true;
    }

    fn requeue(&mut self) {
        let message = std::mem::replace(&mut self.message, BrokerMessage::new(Vec::new()));
        self.topic.requeue(Queued {
            message,
            redeliveries: self.redeliveries + 1,
        });
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            self.requeue();
        }
    }
}
