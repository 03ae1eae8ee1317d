//! Client configuration.
//!
//! Values come from three layers, lowest precedence first: built-in defaults, an optional YAML
//! document, and `INVENTORY_API_*` environment variables.

use crate::resilience::registry::BreakerCategory;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "INVENTORY_API_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub retry: RetrySettings,
    pub breakers: BreakerTable,
    /// Minimum spacing between two accepted calls to the same endpoint. 0 disables.
    pub throttle_interval_ms: u64,
    /// Minimum spacing between two issues of the same deduplicated read. 0 disables.
    pub dedup_interval_ms: u64,
    /// Global request budget in requests per second. 0 disables.
    pub global_rps: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub read_attempts: u32,
    pub write_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BreakerTable {
    pub products: BreakerSettings,
    pub analytics: BreakerSettings,
    pub auth: BreakerSettings,
    pub default: BreakerSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout_ms: 30_000,
            retry: RetrySettings::default(),
            breakers: BreakerTable::default(),
            throttle_interval_ms: 100,
            dedup_interval_ms: 300,
            global_rps: 0.0,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            read_attempts: 3,
            write_attempts: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl Default for BreakerTable {
    fn default() -> Self {
        let read = BreakerSettings {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        };
        Self {
            products: read,
            analytics: read,
            // Mis-tripping auth locks every user out, so it tolerates more and waits longer.
            auth: BreakerSettings {
                failure_threshold: 10,
                reset_timeout_ms: 300_000,
            },
            default: read,
        }
    }
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl BreakerTable {
    pub fn get(&self, category: BreakerCategory) -> BreakerSettings {
        match category {
            BreakerCategory::Products => self.products,
            BreakerCategory::Analytics => self.analytics,
            BreakerCategory::Auth => self.auth,
            BreakerCategory::Default => self.default,
        }
    }

    fn get_mut(&mut self, category: BreakerCategory) -> &mut BreakerSettings {
        match category {
            BreakerCategory::Products => &mut self.products,
            BreakerCategory::Analytics => &mut self.analytics,
            BreakerCategory::Auth => &mut self.auth,
            BreakerCategory::Default => &mut self.default,
        }
    }
}

impl ResilienceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `INVENTORY_API_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("invalid YAML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a YAML file, then apply environment overrides on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut cfg: Self = serde_yaml::from_str(&raw)
            .map_err(|e| Error::configuration(format!("invalid YAML in {}: {}", path.display(), e)))?;
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from an arbitrary variable source (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(v) = var("BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = parse_var(&var, "TIMEOUT_MS")? {
            self.request_timeout_ms = v;
        }
        if let Some(v) = parse_var(&var, "RETRY_ATTEMPTS")? {
            self.retry.read_attempts = v;
        }
        if let Some(v) = parse_var(&var, "WRITE_RETRY_ATTEMPTS")? {
            self.retry.write_attempts = v;
        }
        if let Some(v) = parse_var(&var, "RETRY_DELAY_MS")? {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_var(&var, "RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = parse_var(&var, "THROTTLE_INTERVAL_MS")? {
            self.throttle_interval_ms = v;
        }
        if let Some(v) = parse_var(&var, "DEDUP_INTERVAL_MS")? {
            self.dedup_interval_ms = v;
        }
        if let Some(v) = parse_var(&var, "GLOBAL_RPS")? {
            self.global_rps = v;
        }

        for category in BreakerCategory::ALL {
            let upper = category.as_str().to_uppercase();
            let settings = self.breakers.get_mut(category);
            if let Some(v) = parse_var(&var, &format!("BREAKER_{}_THRESHOLD", upper))? {
                settings.failure_threshold = v;
            }
            if let Some(v) = parse_var(&var, &format!("BREAKER_{}_COOLDOWN_MS", upper))? {
                settings.reset_timeout_ms = v;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_field(format!("invalid base URL: {}", e), "base_url")
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::configuration_field(
                "base URL must use http or https",
                "base_url",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::configuration_field(
                "must be greater than zero",
                "request_timeout_ms",
            ));
        }
        if self.retry.read_attempts == 0 {
            return Err(Error::configuration_field(
                "at least one attempt is required",
                "retry.read_attempts",
            ));
        }
        if self.retry.write_attempts == 0 {
            return Err(Error::configuration_field(
                "at least one attempt is required",
                "retry.write_attempts",
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::configuration_field(
                "must not be below retry.base_delay_ms",
                "retry.max_delay_ms",
            ));
        }
        for category in BreakerCategory::ALL {
            if self.breakers.get(category).failure_threshold == 0 {
                return Err(Error::configuration_field(
                    "must be at least 1",
                    format!("breakers.{}.failure_threshold", category.as_str()),
                ));
            }
        }
        if !self.global_rps.is_finite() || self.global_rps < 0.0 {
            return Err(Error::configuration_field(
                "must be a non-negative number",
                "global_rps",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn dedup_interval(&self) -> Duration {
        Duration::from_millis(self.dedup_interval_ms)
    }
}

fn parse_var<T, F>(var: &F, suffix: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(suffix) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::configuration_field(
                format!("cannot parse '{}'", raw),
                format!("{}{}", ENV_PREFIX, suffix),
            )
        }),
    }
}
