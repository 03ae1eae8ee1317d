//! Request/response hooks for application-layer cross-cutting concerns.
//!
//! Interceptors may rewrite a request before it enters the resilience layers (the throttle
//! and dedup keys are derived from the rewritten request) and observe the final outcome of
//! every call. They never see individual retry attempts.

mod endpoint_correction;

pub use endpoint_correction::{CorrectionRule, EndpointCorrection};

use async_trait::async_trait;

use crate::client::ApiEnvelope;
use crate::transport::ApiRequest;
use crate::Error;

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_request(&self, _req: &mut ApiRequest) {}

    async fn on_response(&self, _req: &ApiRequest, _resp: &ApiEnvelope) {}

    async fn on_error(&self, _req: &ApiRequest, _err: &Error) {}
}

/// Runs hooks in registration order.
pub struct InterceptorPipeline {
    pub(crate) interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    pub fn with<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub async fn prepare(&self, req: &mut ApiRequest) {
        for ic in &self.interceptors {
            ic.on_request(req).await;
        }
    }

    pub async fn complete(&self, req: &ApiRequest, outcome: &Result<ApiEnvelope, Error>) {
        match outcome {
            Ok(resp) => {
                for ic in &self.interceptors {
                    ic.on_response(req, resp).await;
                }
            }
            Err(err) => {
                for ic in &self.interceptors {
                    ic.on_error(req, err).await;
                }
            }
        }
    }

    /// Rewrite `req`, run `f` on the rewritten request, then report the outcome.
    pub async fn execute<F, Fut>(&self, mut req: ApiRequest, f: F) -> Result<ApiEnvelope, Error>
    where
        F: FnOnce(ApiRequest) -> Fut,
        Fut: std::future::Future<Output = Result<ApiEnvelope, Error>>,
    {
        self.prepare(&mut req).await;
        let observed = req.clone();
        let outcome = f(req).await;
        self.complete(&observed, &outcome).await;
        outcome
    }
}

impl Default for InterceptorPipeline {
    fn default() -> Self {
        Self::new()
    }
}
