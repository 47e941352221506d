//! Central registry of named circuit breakers.
//!
//! Each downstream service gets one breaker, registered under its name.
//! The registry is the aggregation point for health reporting: it knows
//! which services are currently healthy (closed circuit) and which are not.

use crate::application::circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
use crate::application::ports::Clock;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry managing one circuit breaker per service name.
///
/// Uses a concurrent map so registration and lookup never contend with
/// in-flight breaker calls.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// Create a registry using the system clock for all breakers.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(crate::infrastructure::clock::SystemClock::new()))
    }

    /// Create a registry with a custom clock, mainly for tests.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            clock,
        }
    }

    /// Register a breaker for a service, or return the existing one.
    ///
    /// Registration is idempotent: a second call with the same name keeps
    /// the first breaker and its accumulated state, ignoring the new config.
    pub fn register(
        &self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();
        self.breakers
            .entry(name.clone())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "registering circuit breaker");
                Arc::new(CircuitBreaker::with_clock(name.clone(), config, self.clock.clone()))
            })
            .clone()
    }

    /// Look up a breaker by service name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    /// Reset one breaker to closed. Returns false if the name is unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Status snapshots for all breakers, keyed by service name.
    pub fn all_status(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    /// Names of services whose circuit is currently closed.
    pub fn healthy_services(&self) -> Vec<String> {
        self.collect_by_state(|state| state == CircuitState::Closed)
    }

    /// Names of services whose circuit is open or half-open.
    pub fn unhealthy_services(&self) -> Vec<String> {
        self.collect_by_state(|state| state != CircuitState::Closed)
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Check if no breakers are registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn collect_by_state(&self, predicate: impl Fn(CircuitState) -> bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| predicate(entry.value().state()))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BoxError;
    use crate::infrastructure::mocks::MockClock;
    use std::time::Duration;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            call_timeout: Duration::from_secs(5),
            failure_classifier: None,
        }
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..2 {
            breaker
                .call(async { Err::<(), BoxError>("down".into()) })
                .await
                .unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = CircuitBreakerRegistry::new();
        let first = registry.register("weather-api", fast_config());
        let second = registry.register("weather-api", CircuitBreakerConfig::default());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_service() {
        let registry = CircuitBreakerRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.reset("nope"));
    }

    #[tokio::test]
    async fn test_healthy_and_unhealthy_services() {
        let registry = CircuitBreakerRegistry::with_clock(Arc::new(MockClock::new()));
        let weather = registry.register("weather-api", fast_config());
        registry.register("mail", fast_config());

        assert_eq!(registry.healthy_services(), vec!["mail", "weather-api"]);
        assert!(registry.unhealthy_services().is_empty());

        trip(&weather).await;
        assert_eq!(registry.healthy_services(), vec!["mail"]);
        assert_eq!(registry.unhealthy_services(), vec!["weather-api"]);
    }

    #[tokio::test]
    async fn test_reset_all() {
        let registry = CircuitBreakerRegistry::with_clock(Arc::new(MockClock::new()));
        let a = registry.register("a", fast_config());
        let b = registry.register("b", fast_config());
        trip(&a).await;
        trip(&b).await;

        registry.reset_all();
        assert_eq!(a.state(), CircuitState::Closed);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(registry.unhealthy_services().len(), 0);
    }

    #[tokio::test]
    async fn test_all_status_snapshot() {
        let registry = CircuitBreakerRegistry::with_clock(Arc::new(MockClock::new()));
        let breaker = registry.register("weather-api", fast_config());
        breaker
            .call(async { Ok::<_, BoxError>(()) })
            .await
            .unwrap();

        let statuses = registry.all_status();
        assert_eq!(statuses.len(), 1);
        let status = &statuses["weather-api"];
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.total_requests, 1);
    }
}
