//! The data-access facade used by UI code.
//!
//! Every call flows through the same fixed stack: interceptors, the global throttle, the
//! read deduplicator (GET only), the endpoint's circuit breaker, the retry policy, and
//! finally the transport.

mod auth;
pub mod builder;
pub mod core;
pub mod envelope;
pub mod signals;

pub use builder::ApiClientBuilder;
pub use core::ApiClient;
pub use envelope::ApiEnvelope;
pub use signals::SignalsSnapshot;

pub const LOGIN_ENDPOINT: &str = "/auth/login";
pub const REFRESH_ENDPOINT: &str = "/auth/refresh";
pub const VERIFY_ENDPOINT: &str = "/auth/verify";
pub const HEALTH_ENDPOINT: &str = "/health";
