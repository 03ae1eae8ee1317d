use super::{ApiRequest, ApiResponse, Transport};
use crate::config::ResilienceConfig;
use crate::error::RateLimitSource;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Longest body excerpt carried inside a malformed-response error.
const BODY_SNIPPET_LEN: usize = 200;

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        // reqwest's own timeout is only a backstop; `send` enforces `timeout` itself so the
        // error carries the endpoint.
        let client = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(1))
            .pool_max_idle_per_host(
                std::env::var("INVENTORY_API_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(16),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(cfg: &ResilienceConfig) -> Result<Self> {
        Self::new(cfg.base_url.clone(), cfg.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn network_error(endpoint: &str, e: reqwest::Error, timeout: Duration) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            Error::Network {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let endpoint = request.endpoint.as_str();
        let url = self.url_for(endpoint);

        let mut req = self
            .client
            .request(request.method.to_reqwest(), &url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header("x-request-id", request.request_id.as_str());
        if let Some(token) = &request.bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let start = Instant::now();
        let exchange = async {
            let resp = req.send().await?;
            let status = resp.status().as_u16();
            let headers = resp.headers().clone();
            let text = resp.text().await?;
            Ok::<_, reqwest::Error>((status, headers, text))
        };

        // Dropping `exchange` at the deadline aborts the in-flight request.
        let (status, headers, text) = match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => {
                debug!(endpoint, request_id = request.request_id.as_str(), "request timed out");
                return Err(Error::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            Ok(Err(e)) => return Err(Self::network_error(endpoint, e, self.timeout)),
            Ok(Ok(parts)) => parts,
        };

        info!(
            http_status = status,
            method = request.method.as_str(),
            endpoint,
            request_id = request.request_id.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "inventory api response"
        );

        classify_response(endpoint, status, retry_after_ms(&headers), &text)
    }
}

/// Best-effort parsing of `Retry-After: <seconds>`.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: u64 = raw.parse().ok()?;
    Some(secs.saturating_mul(1000))
}

/// Map a raw HTTP exchange to a response or a classified error.
pub fn classify_response(
    endpoint: &str,
    status: u16,
    retry_after_ms: Option<u64>,
    body: &str,
) -> Result<ApiResponse> {
    let endpoint_owned = || endpoint.to_string();

    if (200..300).contains(&status) {
        if body.trim().is_empty() {
            return Ok(ApiResponse {
                status,
                body: Value::Null,
            });
        }
        return match serde_json::from_str::<Value>(body) {
            Ok(json) => Ok(ApiResponse { status, body: json }),
            Err(_) => Err(Error::MalformedResponse {
                endpoint: endpoint_owned(),
                status,
                message: snippet(body),
            }),
        };
    }

    if status == 429 {
        return Err(Error::RateLimited {
            endpoint: endpoint_owned(),
            limited_by: RateLimitSource::Remote,
            retry_after_ms,
        });
    }

    let parsed = serde_json::from_str::<Value>(body).ok();
    let (message, code) = parsed
        .as_ref()
        .map(error_fields)
        .unwrap_or((None, None));
    let message = message.unwrap_or_else(|| default_message(status));

    match status {
        401 => Err(Error::AuthenticationRequired {
            endpoint: endpoint_owned(),
            message,
            code,
        }),
        403 => Err(Error::Forbidden {
            endpoint: endpoint_owned(),
            message,
            code,
        }),
        _ if parsed.is_none() => Err(Error::MalformedResponse {
            endpoint: endpoint_owned(),
            status,
            message: snippet(body),
        }),
        _ => Err(Error::Remote {
            endpoint: endpoint_owned(),
            status,
            message,
            code,
        }),
    }
}

/// Extract `{message, code}`; also accepts `{error: {message, code}}` and `{error: "..."}`.
fn error_fields(json: &Value) -> (Option<String>, Option<String>) {
    let as_string = |v: Option<&Value>| v.and_then(|v| v.as_str()).map(|s| s.to_string());

    let mut message = as_string(json.get("message"));
    let mut code = as_string(json.get("code"));
    match json.get("error") {
        Some(Value::Object(inner)) => {
            message = message.or_else(|| as_string(inner.get("message")));
            code = code.or_else(|| as_string(inner.get("code")));
        }
        Some(Value::String(s)) => {
            message = message.or_else(|| Some(s.clone()));
        }
        _ => {}
    }
    (message, code)
}

fn default_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("request failed")
        .to_string()
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty body".to_string();
    }
    trimmed.chars().take(BODY_SNIPPET_LEN).collect()
}
