use crate::config::BreakerSettings;
use crate::{Error, Result};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub failure_count: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

impl From<BreakerSettings> for CircuitBreakerConfig {
    fn from(s: BreakerSettings) -> Self {
        Self::new()
            .with_failure_threshold(s.failure_threshold)
            .with_reset_timeout(s.reset_timeout())
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped by `reset`; permits from an earlier generation no longer count as trials.
    generation: u64,
}

/// Consecutive-failure circuit breaker with a single-trial half-open state.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Admission granted by [`CircuitBreaker::allow`]. Dropping an unresolved trial permit
/// gives the half-open trial slot back.
#[must_use = "resolve the permit with on_success/on_failure"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    resolved: bool,
}

impl Permit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn on_success(mut self) {
        self.resolved = true;
        self.breaker.on_success();
    }

    pub fn on_failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial, self.generation);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.resolved {
            let mut st = self.breaker.lock();
            if st.generation == self.generation {
                st.trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Counters stay meaningful after a panic elsewhere, so a poisoned lock is recovered.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `operation` under the breaker. When the breaker refuses, `operation` is never called.
    pub async fn execute<F, Fut, T>(&self, endpoint: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.allow(endpoint)?;
        match operation().await {
            Ok(v) => {
                permit.on_success();
                Ok(v)
            }
            Err(e) => {
                permit.on_failure();
                Err(e)
            }
        }
    }

    /// Admission check. Moves Open to HalfOpen once the cool-down has elapsed.
    pub fn allow(&self, endpoint: &str) -> Result<Permit<'_>> {
        let mut st = self.lock();
        let now = Instant::now();
        let refuse = |st: &State| Error::CircuitOpen {
            breaker: self.name.clone(),
            endpoint: endpoint.to_string(),
            retry_in_ms: st
                .next_attempt_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64)
                .unwrap_or(0),
        };

        let trial = match st.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let ready = st.next_attempt_at.map(|at| now >= at).unwrap_or(true);
                if !ready {
                    return Err(refuse(&*st));
                }
                st.state = CircuitState::HalfOpen;
                st.trial_in_flight = true;
                info!(breaker = self.name.as_str(), endpoint, "circuit half-open, allowing trial call");
                true
            }
            CircuitState::HalfOpen => {
                if st.trial_in_flight {
                    return Err(refuse(&*st));
                }
                st.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
            generation: st.generation,
            resolved: false,
        })
    }

    fn on_success(&self) {
        let mut st = self.lock();
        if st.state != CircuitState::Closed {
            info!(breaker = self.name.as_str(), "circuit closed after successful trial");
        }
        st.state = CircuitState::Closed;
        st.failure_count = 0;
        st.next_attempt_at = None;
        st.trial_in_flight = false;
    }

    fn on_failure(&self, trial: bool, generation: u64) {
        let mut st = self.lock();
        let trial = trial && generation == st.generation;
        st.failure_count = st.failure_count.saturating_add(1);
        if trial {
            st.trial_in_flight = false;
        }
        if trial || st.failure_count >= self.cfg.failure_threshold {
            let next = Instant::now() + self.cfg.reset_timeout;
            st.state = CircuitState::Open;
            st.next_attempt_at = Some(next);
            warn!(
                breaker = self.name.as_str(),
                failure_count = st.failure_count,
                reset_timeout_ms = self.cfg.reset_timeout.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    /// Force the breaker closed, e.g. when a fresh login proves the backend is reachable.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.failure_count = 0;
        st.next_attempt_at = None;
        st.trial_in_flight = false;
        st.generation = st.generation.wrapping_add(1);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let open_remaining_ms = match st.state {
            CircuitState::Open => st
                .next_attempt_at
                .filter(|at| *at > now)
                .map(|at| (at - now).as_millis() as u64),
            _ => None,
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            reset_timeout_ms: self.cfg.reset_timeout.as_millis() as u64,
            failure_count: st.failure_count,
            open_remaining_ms,
        }
    }
}
