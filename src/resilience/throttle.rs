//! Endpoint-level call spacing plus an optional global budget.

use super::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
use crate::error::RateLimitSource;
use crate::transport::Method;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Rejects calls to the same endpoint issued closer together than `min_interval`.
///
/// The window is keyed by `<METHOD> <endpoint>` and ignores the caller's identity. Rejected
/// calls do not refresh the window.
pub struct GlobalThrottle {
    min_interval: Duration,
    window: Mutex<HashMap<String, Instant>>,
    budget: Option<RateLimiter>,
}

impl GlobalThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            window: Mutex::new(HashMap::new()),
            budget: None,
        }
    }

    /// Also cap the total request rate across all endpoints. A rate of 0 disables the budget.
    pub fn with_global_rps(mut self, rps: f64) -> Self {
        self.budget = RateLimiterConfig::from_rps(rps).map(RateLimiter::new);
        self
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(method: Method, endpoint: &str) -> String {
        format!("{} {}", method.as_str(), endpoint)
    }

    /// Admit or reject one call. Admission records the call in the window.
    pub fn check(&self, method: Method, endpoint: &str) -> Result<()> {
        let now = Instant::now();
        let spacing = !self.min_interval.is_zero();
        let key = Self::key(method, endpoint);
        let mut window = self.lock();

        if spacing {
            if let Some(last) = window.get(&key) {
                let elapsed = now.saturating_duration_since(*last);
                if elapsed < self.min_interval {
                    let retry_after_ms = (self.min_interval - elapsed).as_millis() as u64;
                    warn!(
                        endpoint,
                        method = method.as_str(),
                        retry_after_ms,
                        "call throttled"
                    );
                    return Err(Error::RateLimited {
                        endpoint: endpoint.to_string(),
                        limited_by: RateLimitSource::Throttle,
                        retry_after_ms: Some(retry_after_ms),
                    });
                }
            }
        }

        if let Some(budget) = &self.budget {
            if !budget.try_acquire() {
                let retry_after_ms = budget.snapshot().estimated_wait_ms;
                warn!(endpoint, "global request budget exhausted");
                return Err(Error::RateLimited {
                    endpoint: endpoint.to_string(),
                    limited_by: RateLimitSource::Budget,
                    retry_after_ms,
                });
            }
        }

        if spacing {
            let min_interval = self.min_interval;
            window.retain(|_, last| now.saturating_duration_since(*last) < min_interval);
            window.insert(key, now);
        }
        Ok(())
    }

    /// Number of endpoint keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    pub fn budget_snapshot(&self) -> Option<RateLimiterSnapshot> {
        self.budget.as_ref().map(|b| b.snapshot())
    }
}
