pub mod circuit_breaker;
pub mod clock;
pub mod http_client_factory;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use clock::{ManualClock, SystemClock};
pub use http_client_factory::HttpClientFactory;
