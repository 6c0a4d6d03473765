pub mod circuit_breaker;
pub mod composed;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitMetrics, CircuitState};
pub use composed::{with_circuit_breaker_and_retry, ResilientError};
pub use retry::{BackoffStrategy, RetryAttempt, RetryError, RetryHandler};
