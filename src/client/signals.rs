use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::resilience::rate_limiter::RateLimiterSnapshot;

/// Point-in-time facts about the client's resilience state, for diagnostics and dashboards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalsSnapshot {
    pub breakers: Vec<CircuitBreakerSnapshot>,
    /// Deduplicated reads currently in flight.
    pub pending_reads: usize,
    /// Endpoint keys inside their throttle window.
    pub throttled_endpoints: usize,
    pub global_budget: Option<RateLimiterSnapshot>,
    pub has_token: bool,
}
