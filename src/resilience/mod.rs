//! Resilience primitives composed by the client.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`circuit_breaker`] | Per-category failure detector (Closed, Open, HalfOpen) |
//! | [`registry`] | The fixed set of breakers and the endpoint classification rules |
//! | [`dedup`] | Coalesces identical in-flight reads and spaces repeated ones |
//! | [`throttle`] | Per-endpoint minimum spacing plus an optional global budget |
//! | [`rate_limiter`] | Token bucket behind the global budget |
//! | [`retry`] | Exponential backoff around single-attempt operations |
//!
//! Each primitive is usable on its own:
//!
//! ```rust
//! use inventory_resilience::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> inventory_resilience::Result<()> {
//! let breaker = CircuitBreaker::new(
//!     "products",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! );
//! let value = breaker.execute("/products", || async { Ok(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod dedup;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod throttle;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use dedup::RequestDeduplicator;
pub use registry::{classify, BreakerCategory, CircuitBreakerRegistry, CATEGORY_RULES};
pub use retry::RetryPolicy;
pub use throttle::GlobalThrottle;
