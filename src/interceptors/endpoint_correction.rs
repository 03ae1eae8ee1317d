use super::Interceptor;
use crate::transport::ApiRequest;
use async_trait::async_trait;
use tracing::warn;

/// A literal rewrite applied to the full request path (base path + endpoint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionRule {
    pub pattern: String,
    pub replacement: String,
}

impl CorrectionRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// Normalises known-malformed endpoint paths before dispatch.
///
/// Rules are evaluated against the path the request will actually hit, so an endpoint
/// written as `/api/products` against a base URL ending in `/api` is caught by the same
/// `/api/api/` rule as a literal `/api/api/products`.
///
/// TODO: this hides a caller-side prefix bug; log hits in production and delete the
/// interceptor once callers stop producing them.
pub struct EndpointCorrection {
    base_path: String,
    rules: Vec<CorrectionRule>,
}

impl EndpointCorrection {
    pub fn new(base_url: &str) -> Self {
        Self::with_rules(base_url, vec![CorrectionRule::new("/api/api/", "/api/")])
    }

    pub fn with_rules(base_url: &str, rules: Vec<CorrectionRule>) -> Self {
        let base_path = url::Url::parse(base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        Self { base_path, rules }
    }

    pub fn rules(&self) -> &[CorrectionRule] {
        &self.rules
    }

    /// The corrected endpoint, or `None` when no rule applies.
    pub fn correct(&self, endpoint: &str) -> Option<String> {
        let original = format!("{}{}", self.base_path, endpoint);
        let mut path = original.clone();
        for rule in &self.rules {
            if rule.pattern.is_empty() {
                continue;
            }
            if rule.replacement.contains(&rule.pattern) {
                path = path.replace(&rule.pattern, &rule.replacement);
                continue;
            }
            while path.contains(&rule.pattern) {
                path = path.replacen(&rule.pattern, &rule.replacement, 1);
            }
        }
        if path == original {
            return None;
        }
        let corrected = path
            .strip_prefix(self.base_path.as_str())
            .filter(|rest| rest.starts_with('/'))
            .map(str::to_string)
            .unwrap_or(path);
        Some(corrected)
    }
}

#[async_trait]
impl Interceptor for EndpointCorrection {
    async fn on_request(&self, req: &mut ApiRequest) {
        if let Some(corrected) = self.correct(&req.endpoint) {
            warn!(
                original = req.endpoint.as_str(),
                corrected = corrected.as_str(),
                request_id = req.request_id.as_str(),
                "corrected malformed endpoint path (caller bug)"
            );
            req.endpoint = corrected;
        }
    }
}
