//! One breaker per backend subsystem, selected by endpoint path.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::config::BreakerTable;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerCategory {
    Products,
    Analytics,
    Auth,
    Default,
}

impl BreakerCategory {
    pub const ALL: [BreakerCategory; 4] = [
        BreakerCategory::Products,
        BreakerCategory::Analytics,
        BreakerCategory::Auth,
        BreakerCategory::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerCategory::Products => "products",
            BreakerCategory::Analytics => "analytics",
            BreakerCategory::Auth => "auth",
            BreakerCategory::Default => "default",
        }
    }
}

impl fmt::Display for BreakerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered classification rules: the first marker contained in the path wins.
///
/// `/products/analytics` is therefore a products call, and `/analytics/auth-events` an
/// analytics call. Paths matching nothing use [`BreakerCategory::Default`].
pub const CATEGORY_RULES: &[(&str, BreakerCategory)] = &[
    ("/products", BreakerCategory::Products),
    ("/analytics", BreakerCategory::Analytics),
    ("/auth", BreakerCategory::Auth),
];

pub fn classify(endpoint: &str) -> BreakerCategory {
    CATEGORY_RULES
        .iter()
        .find(|(marker, _)| endpoint.contains(marker))
        .map(|(_, category)| *category)
        .unwrap_or(BreakerCategory::Default)
}

pub struct CircuitBreakerRegistry {
    products: CircuitBreaker,
    analytics: CircuitBreaker,
    auth: CircuitBreaker,
    default: CircuitBreaker,
}

impl CircuitBreakerRegistry {
    pub fn new(table: &BreakerTable) -> Self {
        let build = |category: BreakerCategory| {
            CircuitBreaker::new(
                category.as_str(),
                CircuitBreakerConfig::from(table.get(category)),
            )
        };
        Self {
            products: build(BreakerCategory::Products),
            analytics: build(BreakerCategory::Analytics),
            auth: build(BreakerCategory::Auth),
            default: build(BreakerCategory::Default),
        }
    }

    pub fn classify(&self, endpoint: &str) -> BreakerCategory {
        classify(endpoint)
    }

    pub fn breaker_for(&self, endpoint: &str) -> &CircuitBreaker {
        self.get(classify(endpoint))
    }

    pub fn get(&self, category: BreakerCategory) -> &CircuitBreaker {
        match category {
            BreakerCategory::Products => &self.products,
            BreakerCategory::Analytics => &self.analytics,
            BreakerCategory::Auth => &self.auth,
            BreakerCategory::Default => &self.default,
        }
    }

    pub fn reset_all(&self) {
        for category in BreakerCategory::ALL {
            self.get(category).reset();
        }
    }

    pub fn snapshot(&self) -> Vec<CircuitBreakerSnapshot> {
        BreakerCategory::ALL
            .iter()
            .map(|c| self.get(*c).snapshot())
            .collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(&BreakerTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;

    #[test]
    fn classification_follows_rule_order() {
        assert_eq!(classify("/products/42"), BreakerCategory::Products);
        assert_eq!(classify("/analytics/sales?range=7d"), BreakerCategory::Analytics);
        assert_eq!(classify("/auth/login"), BreakerCategory::Auth);
        assert_eq!(classify("/orders/9"), BreakerCategory::Default);
        assert_eq!(classify("/health"), BreakerCategory::Default);

        // Both markers present: the earlier rule takes it.
        assert_eq!(classify("/analytics/products/top"), BreakerCategory::Products);
        assert_eq!(classify("/auth/analytics"), BreakerCategory::Analytics);
    }

    #[test]
    fn rule_table_order_is_stable() {
        let markers: Vec<&str> = CATEGORY_RULES.iter().map(|(m, _)| *m).collect();
        assert_eq!(markers, vec!["/products", "/analytics", "/auth"]);
    }

    #[test]
    fn breakers_carry_category_tuning() {
        let registry = CircuitBreakerRegistry::default();
        let snapshots = registry.snapshot();
        assert_eq!(snapshots.len(), 4);

        let auth = registry.breaker_for("/auth/refresh").snapshot();
        let products = registry.breaker_for("/products").snapshot();
        assert_eq!(auth.name, "auth");
        assert!(auth.failure_threshold > products.failure_threshold);
        assert!(auth.reset_timeout_ms > products.reset_timeout_ms);
    }

    #[tokio::test]
    async fn breakers_are_isolated_and_reset_together() {
        let mut table = BreakerTable::default();
        table.products.failure_threshold = 1;
        table.analytics.failure_threshold = 1;
        let registry = CircuitBreakerRegistry::new(&table);

        for endpoint in ["/products", "/analytics/sales"] {
            let _ = registry
                .breaker_for(endpoint)
                .execute(endpoint, || async {
                    Err::<(), _>(crate::Error::Network {
                        endpoint: endpoint.into(),
                        message: "down".into(),
                    })
                })
                .await;
        }
        assert_eq!(registry.get(BreakerCategory::Products).state(), CircuitState::Open);
        assert_eq!(registry.get(BreakerCategory::Analytics).state(), CircuitState::Open);
        assert_eq!(registry.get(BreakerCategory::Default).state(), CircuitState::Closed);

        registry.reset_all();
        assert!(registry
            .snapshot()
            .iter()
            .all(|s| s.state == CircuitState::Closed && s.failure_count == 0));
    }
}
