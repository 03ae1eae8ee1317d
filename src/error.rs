use std::fmt;
use thiserror::Error;

/// Which gate produced a rate-limit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitSource {
    /// Per-endpoint minimum spacing enforced locally.
    Throttle,
    /// Global token-bucket budget enforced locally.
    Budget,
    /// The backend answered 429.
    Remote,
}

impl fmt::Display for RateLimitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateLimitSource::Throttle => "throttle",
            RateLimitSource::Budget => "budget",
            RateLimitSource::Remote => "remote",
        };
        f.write_str(s)
    }
}

/// Stable, message-independent classification of an [`Error`].
///
/// UI code should branch on this (or on [`Error::status`]) instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CircuitOpen,
    RateLimited,
    AuthenticationRequired,
    Forbidden,
    Timeout,
    MalformedResponse,
    Network,
    Remote,
    Configuration,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Remote => "REMOTE_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the data-access layer.
///
/// Every request-path variant carries the endpoint it originated from. The type is `Clone`
/// so that callers sharing one deduplicated request all observe the same failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("circuit breaker '{breaker}' is open for {endpoint} (retry in {retry_in_ms}ms)")]
    CircuitOpen {
        breaker: String,
        endpoint: String,
        retry_in_ms: u64,
    },

    #[error("rate limited ({limited_by}) on {endpoint}")]
    RateLimited {
        endpoint: String,
        limited_by: RateLimitSource,
        retry_after_ms: Option<u64>,
    },

    #[error("authentication required for {endpoint}: {message}")]
    AuthenticationRequired {
        endpoint: String,
        message: String,
        code: Option<String>,
    },

    #[error("access to {endpoint} is forbidden: {message}")]
    Forbidden {
        endpoint: String,
        message: String,
        code: Option<String>,
    },

    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("malformed response from {endpoint} (HTTP {status}): {message}")]
    MalformedResponse {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("HTTP {status} from {endpoint}: {message}")]
    Remote {
        endpoint: String,
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("configuration error: {message}{}", format_field(.field))]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("token storage error: {message}")]
    Storage { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

fn format_field(field: &Option<String>) -> String {
    match field {
        Some(f) => format!(" (field: {})", f),
        None => String::new(),
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            field: None,
        }
    }

    pub fn configuration_field(msg: impl Into<String>, field: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage {
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::AuthenticationRequired { .. } => ErrorKind::AuthenticationRequired,
            Error::Forbidden { .. } => ErrorKind::Forbidden,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Error::Network { .. } => ErrorKind::Network,
            Error::Remote { .. } => ErrorKind::Remote,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Storage { .. } => ErrorKind::Storage,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// HTTP status associated with the failure, if one was received (or implied).
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::AuthenticationRequired { .. } => Some(401),
            Error::Forbidden { .. } => Some(403),
            Error::RateLimited {
                limited_by: RateLimitSource::Remote,
                ..
            } => Some(429),
            Error::Timeout { .. } => Some(408),
            Error::MalformedResponse { status, .. } | Error::Remote { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Backend-provided error code when present, otherwise the stable kind code.
    pub fn code(&self) -> &str {
        match self {
            Error::AuthenticationRequired { code: Some(c), .. }
            | Error::Forbidden { code: Some(c), .. }
            | Error::Remote { code: Some(c), .. } => c.as_str(),
            other => other.kind().as_str(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Error::CircuitOpen { endpoint, .. }
            | Error::RateLimited { endpoint, .. }
            | Error::AuthenticationRequired { endpoint, .. }
            | Error::Forbidden { endpoint, .. }
            | Error::Timeout { endpoint, .. }
            | Error::MalformedResponse { endpoint, .. }
            | Error::Network { endpoint, .. }
            | Error::Remote { endpoint, .. } => Some(endpoint.as_str()),
            _ => None,
        }
    }

    /// Whether the retry policy may attempt the call again.
    ///
    /// Local rate-limit rejections are final: they exist to shed load, not to be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { limited_by, .. } => *limited_by == RateLimitSource::Remote,
            Error::Timeout { .. } | Error::Network { .. } => true,
            Error::Remote { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Server-suggested wait before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        let remote_429 = Error::RateLimited {
            endpoint: "/products".into(),
            limited_by: RateLimitSource::Remote,
            retry_after_ms: None,
        };
        let throttled = Error::RateLimited {
            endpoint: "/products".into(),
            limited_by: RateLimitSource::Throttle,
            retry_after_ms: None,
        };
        assert!(remote_429.is_retryable());
        assert!(!throttled.is_retryable());
        assert!(Error::Network {
            endpoint: "/x".into(),
            message: "refused".into()
        }
        .is_retryable());
        assert!(!Error::Forbidden {
            endpoint: "/x".into(),
            message: "no".into(),
            code: None
        }
        .is_retryable());
        assert!(!Error::MalformedResponse {
            endpoint: "/x".into(),
            status: 502,
            message: "<html>".into()
        }
        .is_retryable());
        assert!(Error::Remote {
            endpoint: "/x".into(),
            status: 503,
            message: "down".into(),
            code: None
        }
        .is_retryable());
        assert!(!Error::Remote {
            endpoint: "/x".into(),
            status: 422,
            message: "invalid".into(),
            code: None
        }
        .is_retryable());
    }

    #[test]
    fn code_prefers_backend_code() {
        let err = Error::Remote {
            endpoint: "/orders".into(),
            status: 409,
            message: "conflict".into(),
            code: Some("ORDER_LOCKED".into()),
        };
        assert_eq!(err.code(), "ORDER_LOCKED");
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.endpoint(), Some("/orders"));

        let open = Error::CircuitOpen {
            breaker: "products".into(),
            endpoint: "/products".into(),
            retry_in_ms: 10,
        };
        assert_eq!(open.code(), "CIRCUIT_OPEN");
        assert_eq!(open.status(), None);
    }

    #[test]
    fn configuration_display_includes_field() {
        let err = Error::configuration_field("must be positive", "retry.read_attempts");
        assert_eq!(
            err.to_string(),
            "configuration error: must be positive (field: retry.read_attempts)"
        );
    }
}
