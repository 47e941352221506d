//! Integration tests for circuit breaker behavior end to end.

use plantcare_core::{
    BoxError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> CircuitBreakerConfig {
    init_tracing();
    CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_millis(100),
        success_threshold: 2,
        call_timeout: Duration::from_secs(1),
        failure_classifier: None,
    }
}

#[tokio::test]
async fn test_full_breaker_lifecycle() {
    let breaker = CircuitBreaker::new("weather-api", fast_config());
    let calls = Arc::new(AtomicUsize::new(0));

    // Two failures open the circuit.
    for _ in 0..2 {
        let calls = calls.clone();
        let result = breaker
            .call(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>("weather service down".into())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Operation(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // While open, calls fail fast without touching the operation.
    {
        let calls = calls.clone();
        let result = breaker
            .call(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // After the recovery timeout the breaker probes in half-open state.
    tokio::time::sleep(Duration::from_millis(150)).await;
    breaker
        .call(async { Ok::<_, BoxError>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // A second success closes it.
    breaker
        .call(async { Ok::<_, BoxError>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    // The new closed period starts with clean counters.
    let status = breaker.status();
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.success_count, 0);
    assert!(status.recent_state_changes.len() >= 3);
}

#[tokio::test]
async fn test_half_open_failure_restarts_recovery() {
    let breaker = CircuitBreaker::new("plant-id", fast_config());

    for _ in 0..2 {
        breaker
            .call(async { Err::<(), BoxError>("down".into()) })
            .await
            .unwrap_err();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The probe fails, reopening the circuit immediately.
    breaker
        .call(async { Err::<(), BoxError>("still down".into()) })
        .await
        .unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = breaker
        .call(async { Ok::<_, BoxError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, CircuitBreakerError::Open { .. }));
}

#[tokio::test]
async fn test_slow_calls_trip_the_breaker() {
    let config = CircuitBreakerConfig {
        failure_threshold: 2,
        call_timeout: Duration::from_millis(20),
        ..fast_config()
    };
    let breaker = CircuitBreaker::new("mail", config);

    for _ in 0..2 {
        let err = breaker
            .call(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<(), BoxError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CircuitBreakerError::Timeout { .. }));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn test_registry_tracks_health_across_services() {
    let registry = CircuitBreakerRegistry::new();
    let weather = registry.register("weather-api", fast_config());
    registry.register("plant-id", fast_config());

    for _ in 0..2 {
        weather
            .call(async { Err::<(), BoxError>("down".into()) })
            .await
            .unwrap_err();
    }

    assert_eq!(registry.healthy_services(), vec!["plant-id"]);
    assert_eq!(registry.unhealthy_services(), vec!["weather-api"]);

    // Fetching the same breaker again returns the shared instance.
    let same = registry.register("weather-api", CircuitBreakerConfig::default());
    assert_eq!(same.state(), CircuitState::Open);

    registry.reset("weather-api");
    assert!(registry.unhealthy_services().is_empty());
    weather
        .call(async { Ok::<_, BoxError>(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_share_one_breaker() {
    let breaker = Arc::new(CircuitBreaker::new("shared", fast_config()));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let breaker = breaker.clone();
        tasks.push(tokio::spawn(async move {
            breaker
                .call(async { Err::<(), BoxError>("down".into()) })
                .await
                .unwrap_err();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Well past the threshold of two; whatever the interleaving, the
    // breaker must have opened.
    assert_eq!(breaker.state(), CircuitState::Open);
}
