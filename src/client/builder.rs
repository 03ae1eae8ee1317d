use crate::auth::{MemoryTokenStore, TokenManager, TokenStore};
use crate::client::core::{ApiClient, ClientContext};
use crate::config::ResilienceConfig;
use crate::interceptors::{EndpointCorrection, Interceptor, InterceptorPipeline};
use crate::resilience::{CircuitBreakerRegistry, GlobalThrottle, RequestDeduplicator, RetryPolicy};
use crate::transport::{HttpTransport, Transport};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    config: Option<ResilienceConfig>,
    base_url_override: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn TokenStore>>,
    interceptors: Vec<Box<dyn Interceptor>>,
    endpoint_correction: bool,
    sync_tokens: bool,
}

impl ApiClientBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            base_url_override: None,
            transport: None,
            store: None,
            interceptors: Vec::new(),
            endpoint_correction: true,
            sync_tokens: true,
        }
    }

    /// Use `config` instead of reading `INVENTORY_API_*` from the environment.
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    /// Replace the HTTP transport, e.g. with a scripted one in tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where the session is persisted. Defaults to a process-local store.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn endpoint_correction(mut self, enable: bool) -> Self {
        self.endpoint_correction = enable;
        self
    }

    /// Follow session changes made by other processes through the token store (default on).
    pub fn sync_tokens(mut self, enable: bool) -> Self {
        self.sync_tokens = enable;
        self
    }

    /// Build the client. Loads the persisted session from the token store.
    pub async fn build(self) -> Result<ApiClient> {
        let mut config = match self.config {
            Some(c) => c,
            None => ResilienceConfig::from_env()?,
        };
        if let Some(url) = self.base_url_override {
            config.base_url = url;
        }
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::from_config(&config)?),
        };

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let tokens = Arc::new(TokenManager::new(store).await?);
        if self.sync_tokens {
            // Ends by itself once the manager is dropped.
            let _ = tokens.spawn_sync();
        }

        let mut interceptors = InterceptorPipeline::new();
        if self.endpoint_correction {
            interceptors.push(Box::new(EndpointCorrection::new(&config.base_url)));
        }
        for ic in self.interceptors {
            interceptors.push(ic);
        }

        let throttle =
            GlobalThrottle::new(config.throttle_interval()).with_global_rps(config.global_rps);

        debug!(
            base_url = config.base_url.as_str(),
            interceptors = interceptors.len(),
            "api client built"
        );

        let context = ClientContext {
            transport,
            registry: CircuitBreakerRegistry::new(&config.breakers),
            dedup: RequestDeduplicator::new(config.dedup_interval()),
            throttle,
            tokens,
            interceptors,
            read_retry: RetryPolicy::for_reads(&config.retry),
            write_retry: RetryPolicy::for_writes(&config.retry),
            config,
        };
        Ok(ApiClient::from_context(context))
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
