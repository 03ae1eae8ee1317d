//! Single-attempt HTTP transport.
//!
//! A [`Transport`] sends exactly one request and turns the outcome into either an
//! [`ApiResponse`] or a classified [`Error`](crate::Error). Retry, breaking and
//! deduplication all live above this layer.

pub mod http;

pub use http::{classify_response, HttpTransport};

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// HTTP verbs exposed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Only reads are safe to coalesce.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Method::Get)
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing request as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL, e.g. `/products/42`.
    pub endpoint: String,
    pub body: Option<Value>,
    /// Bearer token attached at send time.
    pub bearer: Option<String>,
    /// Correlation id sent as `x-request-id`.
    pub request_id: String,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body,
            bearer: None,
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// A successful (2xx) response with its parsed JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` once. Must not retry.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}
