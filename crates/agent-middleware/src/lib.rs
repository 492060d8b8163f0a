//! Resilience middleware: each decorator wraps an `Arc<dyn Agent>` and
//! implements `Agent` itself, so they compose by nesting construction calls,
//! e.g. `RetryDecorator::new(Arc::new(CircuitBreakerDecorator::new(agent, cb_cfg)), retry_cfg)`.

mod batching;
mod cache;
mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use batching::{BatchingConfig, BatchingDecorator, BatchingMetrics};
pub use cache::{CachingConfig, CachingDecorator, CachingMetrics, KeyGenerator};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerDecorator, CircuitBreakerMetrics, CircuitState,
};
pub use rate_limiter::{RateLimiterConfig, RateLimiterDecorator, RateLimiterMetrics};
pub use retry::{RetryConfig, RetryDecorator, RetryMetrics};
