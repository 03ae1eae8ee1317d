//! Credential calls. All of them make a single attempt through the auth breaker.

use crate::client::core::{ApiClient, Route};
use crate::client::envelope::ApiEnvelope;
use crate::client::{LOGIN_ENDPOINT, REFRESH_ENDPOINT, VERIFY_ENDPOINT};
use crate::resilience::RetryPolicy;
use crate::transport::{ApiRequest, Method};
use crate::{Error, Result};
use serde_json::{json, Value};
use tracing::info;

impl ApiClient {
    /// Log in and store the returned session.
    ///
    /// All breakers are reset first: a fresh credential attempt is independent evidence
    /// about the backend and must not be blocked by stale failure history.
    pub async fn login(&self, email: &str, password: &str) -> Result<ApiEnvelope> {
        self.inner.registry.reset_all();
        let body = json!({ "email": email, "password": password });
        let envelope = self
            .credential_call(Method::Post, LOGIN_ENDPOINT, Some(body))
            .await?;

        let token = session_token(&envelope).ok_or_else(|| Error::MalformedResponse {
            endpoint: LOGIN_ENDPOINT.to_string(),
            status: 200,
            message: "login response carried no token".to_string(),
        })?;
        let user = envelope.field_or_top("user").cloned();
        self.inner.tokens.set_session(token, user).await?;
        info!("login succeeded, session stored");
        Ok(envelope)
    }

    /// Exchange the current token for a new one.
    pub async fn refresh_token(&self) -> Result<ApiEnvelope> {
        let envelope = self
            .credential_call(Method::Post, REFRESH_ENDPOINT, None)
            .await?;
        let token = session_token(&envelope).ok_or_else(|| Error::MalformedResponse {
            endpoint: REFRESH_ENDPOINT.to_string(),
            status: 200,
            message: "refresh response carried no token".to_string(),
        })?;
        match envelope.field("user").cloned() {
            Some(user) => self.inner.tokens.set_session(token, Some(user)).await?,
            None => self.inner.tokens.set_token(Some(token)).await?,
        }
        Ok(envelope)
    }

    /// Ask the backend whether the current token is still valid. A 401 here clears it.
    pub async fn verify_token(&self) -> Result<ApiEnvelope> {
        let envelope = self.credential_call(Method::Get, VERIFY_ENDPOINT, None).await?;
        if let Some(user) = envelope.field("user").cloned() {
            self.inner.tokens.set_identity(Some(user)).await?;
        }
        Ok(envelope)
    }

    /// Forget the session locally and in the token store.
    pub async fn logout(&self) -> Result<()> {
        self.inner.tokens.clear().await?;
        info!("logged out");
        Ok(())
    }

    async fn credential_call(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<ApiEnvelope> {
        let req = ApiRequest::new(method, endpoint, body);
        let envelope = self
            .call(req, RetryPolicy::single_attempt(), Route::Guarded)
            .await?;
        if !envelope.success {
            return Err(Error::AuthenticationRequired {
                endpoint: endpoint.to_string(),
                message: envelope
                    .message
                    .clone()
                    .or_else(|| envelope.error.clone())
                    .unwrap_or_else(|| "credentials rejected".to_string()),
                code: envelope.code.clone(),
            });
        }
        Ok(envelope)
    }
}

/// `data.token`, falling back to a top-level `token` for backends that skip the envelope.
fn session_token(envelope: &ApiEnvelope) -> Option<String> {
    envelope
        .field_or_top("token")
        .and_then(Value::as_str)
        .map(str::to_string)
}
