//! Retry with exponential backoff around a single-attempt operation.

use crate::config::RetrySettings;
use crate::{Error, Result};
use std::future::Future;
use tokio::time::Duration;
use tracing::{debug, warn};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// One attempt, no backoff. Used for credential calls.
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn for_reads(settings: &RetrySettings) -> Self {
        Self::new(
            settings.read_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    pub fn for_writes(settings: &RetrySettings) -> Self {
        Self::new(
            settings.write_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base.saturating_mul(factor));
        delay.min(self.max_delay)
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return Decision::Fail;
        }
        let delay = match err.retry_after_ms() {
            Some(ms) => Duration::from_millis(ms).min(self.max_delay),
            None => self.backoff(attempt),
        };
        Decision::Retry { delay }
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out.
    ///
    /// The operation receives the 1-based attempt number. Attempts never overlap.
    pub async fn execute<F, Fut, T>(&self, endpoint: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let err = match operation(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            match self.decide(&err, attempt) {
                Decision::Retry { delay } => {
                    debug!(
                        endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Decision::Fail => {
                    if err.is_retryable() {
                        warn!(endpoint, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_reads(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitSource;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn network() -> Error {
        Error::Network {
            endpoint: "/products".into(),
            message: "connection refused".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(700));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(700));
        assert_eq!(policy.backoff(64), Duration::from_millis(700));
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));
        let forbidden = Error::Forbidden {
            endpoint: "/orders".into(),
            message: "no".into(),
            code: None,
        };
        assert_eq!(policy.decide(&forbidden, 1), Decision::Fail);
        assert_eq!(policy.decide(&network(), 3), Decision::Fail);
        assert!(matches!(policy.decide(&network(), 2), Decision::Retry { .. }));
    }

    #[test]
    fn retry_after_hint_overrides_backoff_but_stays_capped() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(500));
        let limited = |ms| Error::RateLimited {
            endpoint: "/products".into(),
            limited_by: RateLimitSource::Remote,
            retry_after_ms: Some(ms),
        };
        assert_eq!(
            policy.decide(&limited(200), 1),
            Decision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            policy.decide(&limited(60_000), 1),
            Decision::Retry {
                delay: Duration::from_millis(500)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delays_grow_between_attempts() {
        let d = Duration::from_millis(250);
        let policy = RetryPolicy::new(3, d, Duration::from_secs(5));
        let stamps = Mutex::new(Vec::new());

        let err = policy
            .execute("/products", |_| {
                stamps.lock().unwrap().push(Instant::now());
                async { Err::<(), _>(network()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err, network());

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 3);
        let first = stamps[1] - stamps[0];
        let second = stamps[2] - stamps[1];
        assert!(first >= d);
        assert!(second >= 2 * d);
        assert!(second > first);
        assert!(second <= policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_later_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_secs(1));
        let result = policy
            .execute("/products", |attempt| async move {
                if attempt < 3 {
                    Err(network())
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_rate_limit_surfaces_after_last_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));
        let limited = Error::RateLimited {
            endpoint: "/analytics/sales".into(),
            limited_by: RateLimitSource::Remote,
            retry_after_ms: Some(200),
        };
        let stamps = Mutex::new(Vec::new());

        let err = policy
            .execute("/analytics/sales", |_| {
                stamps.lock().unwrap().push(Instant::now());
                let limited = limited.clone();
                async move { Err::<(), _>(limited) }
            })
            .await
            .unwrap_err();
        assert_eq!(err, limited);

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 3);
        // The server hint replaces the 10 ms backoff.
        assert!(stamps[1] - stamps[0] >= Duration::from_millis(200));
        assert!(stamps[2] - stamps[1] >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_secs(1));
        let result = policy
            .execute("/orders", |attempt| async move {
                if attempt == 1 {
                    Err(Error::Timeout {
                        endpoint: "/orders".into(),
                        timeout_ms: 30_000,
                    })
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn single_attempt_never_retries() {
        let policy = RetryPolicy::single_attempt();
        let mut calls = 0;
        let _ = policy
            .execute("/auth/login", |_| {
                calls += 1;
                async { Err::<(), _>(network()) }
            })
            .await;
        assert_eq!(calls, 1);
    }
}
