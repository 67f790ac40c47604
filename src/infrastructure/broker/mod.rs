//! Domain-event publishing to the message broker
//!
//! The producer goes through the circuit breaker and the health cache; the
//! transports are interchangeable behind `BrokerTransport`.

pub mod consumer;
pub mod health_cache;
pub mod in_memory;
pub mod producer;
pub mod rest_proxy;

pub use consumer::{EventConsumer, MessageHandler};
pub use health_cache::{HealthCache, HealthCacheEntry};
pub use in_memory::{Delivery, InMemoryBroker, Subscription};
pub use producer::{EventProducer, ProducerStatus, RetryPolicy};
pub use rest_proxy::RestProxyTransport;
