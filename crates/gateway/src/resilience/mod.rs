//! Resilience layer: circuit breaker, retry, and time limiter as
//! independently testable units, composed by [`registry::ResilienceRegistry`]
//! into the single call path every upstream invocation goes through.

pub mod circuit_breaker;
pub mod registry;
pub mod retry;
pub mod time_limiter;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use registry::ResilienceRegistry;
pub use retry::{RetryConfig, retry};
