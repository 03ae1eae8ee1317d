use crate::auth::{AuthEvent, TokenManager};
use crate::client::envelope::ApiEnvelope;
use crate::client::signals::SignalsSnapshot;
use crate::client::HEALTH_ENDPOINT;
use crate::config::ResilienceConfig;
use crate::interceptors::InterceptorPipeline;
use crate::resilience::{
    classify, CircuitBreakerRegistry, GlobalThrottle, RequestDeduplicator, RetryPolicy,
};
use crate::transport::{ApiRequest, Method, Transport};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Everything one client shares across its layers. Built once by [`ApiClientBuilder`].
///
/// [`ApiClientBuilder`]: crate::client::ApiClientBuilder
pub(crate) struct ClientContext {
    pub(crate) config: ResilienceConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: CircuitBreakerRegistry,
    pub(crate) dedup: RequestDeduplicator<ApiEnvelope>,
    pub(crate) throttle: GlobalThrottle,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) interceptors: InterceptorPipeline,
    pub(crate) read_retry: RetryPolicy,
    pub(crate) write_retry: RetryPolicy,
}

/// Resilient client for the inventory backend. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) inner: Arc<ClientContext>,
}

/// Whether a call goes through the full stack or only through retry (health checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Guarded,
    Unguarded,
}

impl ApiClient {
    pub(crate) fn from_context(context: ClientContext) -> Self {
        Self {
            inner: Arc::new(context),
        }
    }

    /// Client for `base_url` with every other setting from the environment.
    pub async fn new(base_url: &str) -> Result<Self> {
        crate::client::ApiClientBuilder::new()
            .base_url(base_url)
            .build()
            .await
    }

    pub async fn get(&self, endpoint: &str) -> Result<ApiEnvelope> {
        self.request(Method::Get, endpoint, None).await
    }

    pub async fn post(&self, endpoint: &str, body: Value) -> Result<ApiEnvelope> {
        self.request(Method::Post, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: Value) -> Result<ApiEnvelope> {
        self.request(Method::Put, endpoint, Some(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: Value) -> Result<ApiEnvelope> {
        self.request(Method::Patch, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<ApiEnvelope> {
        self.request(Method::Delete, endpoint, None).await
    }

    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<ApiEnvelope> {
        let policy = if method.is_idempotent() {
            self.inner.read_retry.clone()
        } else {
            self.inner.write_retry.clone()
        };
        self.call(ApiRequest::new(method, endpoint, body), policy, Route::Guarded)
            .await
    }

    /// GET the health endpoint. Skips throttle, dedup and breakers so polling can neither
    /// be refused by nor trip a breaker used by business calls.
    pub async fn health_check(&self) -> Result<ApiEnvelope> {
        let req = ApiRequest::new(Method::Get, HEALTH_ENDPOINT, None);
        self.call(req, self.inner.read_retry.clone(), Route::Unguarded)
            .await
    }

    pub(crate) async fn call(
        &self,
        req: ApiRequest,
        policy: RetryPolicy,
        route: Route,
    ) -> Result<ApiEnvelope> {
        let ctx = Arc::clone(&self.inner);
        self.inner
            .interceptors
            .execute(req, move |req| async move {
                match route {
                    Route::Guarded => ctx.dispatch(req, policy).await,
                    Route::Unguarded => ctx.retried(&req, &policy).await,
                }
            })
            .await
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.inner.config
    }

    pub fn subscribe_auth(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.tokens.subscribe()
    }

    pub fn signals(&self) -> SignalsSnapshot {
        SignalsSnapshot {
            breakers: self.inner.registry.snapshot(),
            pending_reads: self.inner.dedup.pending(),
            throttled_endpoints: self.inner.throttle.tracked(),
            global_budget: self.inner.throttle.budget_snapshot(),
            has_token: self.inner.tokens.has_token(),
        }
    }
}

impl ClientContext {
    async fn dispatch(self: Arc<Self>, req: ApiRequest, policy: RetryPolicy) -> Result<ApiEnvelope> {
        if !req.method.is_idempotent() {
            self.throttle.check(req.method, &req.endpoint)?;
            return self.protected(&req, &policy).await;
        }

        let key = format!("GET:{}:{}", req.endpoint, self.tokens.fingerprint());
        // Joining an in-flight read sends nothing, so it is not subject to the throttle.
        if let Some(shared) = self.dedup.join(&key) {
            return shared.await;
        }
        self.throttle.check(req.method, &req.endpoint)?;

        let ctx = Arc::clone(&self);
        self.dedup
            .deduplicate(key, move || async move { ctx.protected(&req, &policy).await })
            .await
    }

    /// Breaker around retry around a single transport attempt.
    async fn protected(&self, req: &ApiRequest, policy: &RetryPolicy) -> Result<ApiEnvelope> {
        let breaker = self.registry.breaker_for(&req.endpoint);
        breaker
            .execute(&req.endpoint, || self.retried(req, policy))
            .await
    }

    async fn retried(&self, req: &ApiRequest, policy: &RetryPolicy) -> Result<ApiEnvelope> {
        policy
            .execute(&req.endpoint, |attempt| self.send_once(req, attempt))
            .await
    }

    async fn send_once(&self, req: &ApiRequest, attempt: u32) -> Result<ApiEnvelope> {
        let mut outgoing = req.clone();
        outgoing.bearer = self.tokens.token().map(|t| t.as_ref().clone());
        debug!(
            endpoint = req.endpoint.as_str(),
            method = req.method.as_str(),
            attempt,
            request_id = req.request_id.as_str(),
            "sending request"
        );

        match self.transport.send(&outgoing).await {
            Ok(resp) => Ok(ApiEnvelope::from_body(resp.body)),
            Err(err @ Error::AuthenticationRequired { .. }) => {
                self.tokens
                    .handle_unauthorized(
                        &req.endpoint,
                        classify(&req.endpoint),
                        outgoing.bearer.as_deref(),
                    )
                    .await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
