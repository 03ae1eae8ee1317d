//! Coalescing of concurrent identical reads.
//!
//! The first caller for a key registers a pending entry before anything is awaited; every
//! caller arriving while it is pending awaits the same shared future. The operation runs on
//! its own task, so it settles (and its entry is removed) even if every caller goes away.

use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A pending result that any number of callers may await.
pub type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T: Clone> {
    id: u64,
    future: SharedResult<T>,
}

struct State<T: Clone> {
    pending: HashMap<String, Pending<T>>,
    last_issued: HashMap<String, Instant>,
    next_id: u64,
}

impl<T: Clone> State<T> {
    fn prune(&mut self, now: Instant, min_interval: Duration) {
        let pending = &self.pending;
        self.last_issued.retain(|key, issued| {
            pending.contains_key(key) || now.saturating_duration_since(*issued) < min_interval
        });
    }
}

pub struct RequestDeduplicator<T: Clone> {
    min_interval: Duration,
    state: Arc<Mutex<State<T>>>,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Arc::new(Mutex::new(State {
                pending: HashMap::new(),
                last_issued: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The in-flight future for `key`, if one is pending.
    pub fn join(&self, key: &str) -> Option<SharedResult<T>> {
        let st = self.lock();
        st.pending.get(key).map(|p| {
            debug!(key, "joining in-flight request");
            p.future.clone()
        })
    }

    /// Run `operation` unless an identical call is already pending, in which case share it.
    ///
    /// If the previous issue of `key` was less than `min_interval` ago, the operation is
    /// delayed by the remainder; the delayed call is pending (and joinable) immediately.
    pub async fn deduplicate<F, Fut>(&self, key: impl Into<String>, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let shared = {
            let mut st = self.lock();
            match st.pending.get(&key) {
                Some(p) => {
                    debug!(key = key.as_str(), "joining in-flight request");
                    p.future.clone()
                }
                None => self.register(&mut st, key, operation),
            }
        };
        shared.await
    }

    fn register<F, Fut>(&self, st: &mut State<T>, key: String, operation: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let now = Instant::now();
        let wait = st
            .last_issued
            .get(&key)
            .map(|issued| {
                self.min_interval
                    .saturating_sub(now.saturating_duration_since(*issued))
            })
            .filter(|w| !w.is_zero());

        st.prune(now, self.min_interval);
        st.last_issued
            .insert(key.clone(), now + wait.unwrap_or_default());

        let id = st.next_id;
        st.next_id = st.next_id.wrapping_add(1);

        let state = Arc::clone(&self.state);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            if let Some(wait) = wait {
                debug!(
                    key = task_key.as_str(),
                    wait_ms = wait.as_millis() as u64,
                    "spacing repeated request"
                );
                tokio::time::sleep(wait).await;
            }
            let result = operation().await;
            let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
            if st.pending.get(&task_key).map(|p| p.id) == Some(id) {
                st.pending.remove(&task_key);
            }
            result
        });

        let future: SharedResult<T> = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::internal(format!("deduplicated request task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        st.pending.insert(
            key,
            Pending {
                id,
                future: future.clone(),
            },
        );
        future
    }

    /// Number of keys with a call in flight.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op(
        calls: Arc<AtomicU32>,
        result: Result<u32>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> + Send + 'static {
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_invocation() {
        let dedup = Arc::new(RequestDeduplicator::<u32>::new(Duration::ZERO));
        let calls = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let dedup = Arc::clone(&dedup);
            let op = counting_op(Arc::clone(&calls), Ok(42), Duration::from_millis(50));
            tasks.push(tokio::spawn(async move {
                dedup.deduplicate("GET:/products:anonymous", op).await
            }));
        }
        let results = futures::future::join_all(tasks).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for r in results {
            assert_eq!(r.unwrap().unwrap(), 42);
        }
        assert_eq!(dedup.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_failure_reaches_every_caller() {
        let dedup = RequestDeduplicator::<u32>::new(Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let failure = Error::Network {
            endpoint: "/products".into(),
            message: "reset".into(),
        };

        let (a, b, c) = tokio::join!(
            dedup.deduplicate(
                "k",
                counting_op(Arc::clone(&calls), Err(failure.clone()), Duration::from_millis(10))
            ),
            dedup.deduplicate("k", counting_op(Arc::clone(&calls), Ok(1), Duration::ZERO)),
            dedup.deduplicate("k", counting_op(Arc::clone(&calls), Ok(2), Duration::ZERO)),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap_err(), failure);
        assert_eq!(b.unwrap_err(), failure);
        assert_eq!(c.unwrap_err(), failure);
        assert_eq!(dedup.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_are_not_collapsed() {
        let dedup = RequestDeduplicator::<u32>::new(Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let (a, b) = tokio::join!(
            dedup.deduplicate("GET:/products:aaa", counting_op(Arc::clone(&calls), Ok(1), Duration::from_millis(5))),
            dedup.deduplicate("GET:/products:bbb", counting_op(Arc::clone(&calls), Ok(2), Duration::from_millis(5))),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_call_is_spaced_and_joinable() {
        let interval = Duration::from_millis(300);
        let dedup = Arc::new(RequestDeduplicator::<u32>::new(interval));
        let calls = Arc::new(AtomicU32::new(0));

        let start = Instant::now();
        dedup
            .deduplicate("k", counting_op(Arc::clone(&calls), Ok(1), Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(dedup.pending(), 0);

        // Issued again right away: scheduled for the end of the interval, pending meanwhile.
        let first = {
            let dedup = Arc::clone(&dedup);
            let op = counting_op(Arc::clone(&calls), Ok(2), Duration::ZERO);
            tokio::spawn(async move { dedup.deduplicate("k", op).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(dedup.pending(), 1);
        let joined = dedup.join("k").expect("scheduled call is joinable");

        assert_eq!(joined.await.unwrap(), 2);
        assert_eq!(first.await.unwrap().unwrap(), 2);
        assert!(start.elapsed() >= interval);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_callers_do_not_cancel_the_shared_call() {
        let dedup = RequestDeduplicator::<u32>::new(Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));

        let abandoned = dedup.deduplicate(
            "k",
            counting_op(Arc::clone(&calls), Ok(9), Duration::from_millis(100)),
        );
        // Poll once so the entry is registered, then give up on it.
        let _ = futures::poll!(Box::pin(abandoned));

        assert_eq!(dedup.join("k").expect("still pending").await.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.pending(), 0);
    }
}
