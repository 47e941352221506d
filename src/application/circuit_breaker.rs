//! Circuit breaker protecting calls to external services.
//!
//! Wraps fallible async operations and tracks their outcomes. After a run of
//! consecutive failures the circuit opens and calls fail fast without
//! touching the downstream service. Once a recovery timeout has elapsed the
//! next call probes the service in half-open state; a run of successes
//! closes the circuit again, a single failure reopens it.
//!
//! State transitions are lazy: they happen when a call observes that the
//! timeout has elapsed, never from a background task.

use crate::application::ports::{BoxError, Clock};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Operating normally, calls pass through.
    Closed,
    /// Failing fast, calls are rejected without running the operation.
    Open,
    /// Probing recovery with a limited number of test calls.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Classifier deciding whether a failure was expected for the service.
///
/// Expected failures (e.g. a downstream returning a well-known transient
/// error) are logged at warn level, unexpected ones at error level. Both
/// count towards the failure threshold.
pub type FailureClassifier = Arc<dyn Fn(&BoxError) -> bool + Send + Sync>;

/// Configuration for circuit breaker behavior.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to stay open before probing recovery.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Per-call timeout; elapsed calls count as failures.
    pub call_timeout: Duration,
    /// Optional classifier for expected vs unexpected failures.
    pub failure_classifier: Option<FailureClassifier>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            call_timeout: Duration::from_secs(30),
            failure_classifier: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("success_threshold", &self.success_threshold)
            .field("call_timeout", &self.call_timeout)
            .field(
                "failure_classifier",
                &self.failure_classifier.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

impl CircuitBreakerConfig {
    /// Attach a failure classifier.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&BoxError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failure_classifier = Some(Arc::new(classifier));
        self
    }
}

/// One recorded state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Outcome counters and transition history for one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Consecutive failures in the current closed period.
    pub failure_count: u32,
    /// Successes since the counters were last reset.
    pub success_count: u32,
    /// All calls that reached the operation, over the breaker's lifetime.
    pub total_requests: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Transition log, oldest first.
    pub state_changes: Vec<StateChange>,
    pub created_at: DateTime<Utc>,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure_time: None,
            last_success_time: None,
            state_changes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn record_success(&mut self) {
        self.success_count += 1;
        self.failure_count = 0;
        self.total_requests += 1;
        self.last_success_time = Some(Utc::now());
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        self.total_requests += 1;
        self.last_failure_time = Some(Utc::now());
    }

    fn record_state_change(&mut self, from: CircuitState, to: CircuitState) {
        self.state_changes.push(StateChange {
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Reset the outcome counters while keeping the transition history.
    fn reset_counters(&mut self) {
        self.failure_count = 0;
        self.success_count = 0;
    }

    /// Current consecutive failures relative to lifetime calls, in
    /// `[0.0, 1.0]`.
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        f64::from(self.failure_count) / self.total_requests as f64
    }
}

/// Errors surfaced by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit breaker `{service}` is open, retry in {retry_after}s")]
    Open { service: String, retry_after: u64 },
    /// The operation ran but exceeded the configured call timeout.
    #[error("call through circuit breaker `{service}` timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },
    /// The operation ran and returned an error.
    #[error("operation failed")]
    Operation(#[source] BoxError),
}

/// Snapshot of a breaker's state and counters, for health endpoints.
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub failure_rate: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Most recent transitions, oldest first (at most ten).
    pub recent_state_changes: Vec<StateChange>,
    pub created_at: DateTime<Utc>,
}

struct BreakerInner {
    state: CircuitState,
    stats: CircuitBreakerStats,
    /// Monotonic time of the last failure, drives the recovery timeout.
    last_failure_at: Option<Instant>,
    half_open_successes: u32,
}

/// Circuit breaker for one named downstream service.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`. The inner
/// mutex is only held for short bookkeeping sections and never across an
/// await point, so the wrapped operation runs unlocked. Two calls that both
/// observe an expired recovery timeout may both be admitted as half-open
/// probes; the success threshold absorbs this.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker with a custom clock, mainly for tests.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                stats: CircuitBreakerStats::new(),
                last_failure_at: None,
                half_open_successes: 0,
            }),
        }
    }

    /// Create a breaker using the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(
            name,
            config,
            Arc::new(crate::infrastructure::clock::SystemClock::new()),
        )
    }

    /// Name of the protected service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Run an operation through the breaker.
    ///
    /// Rejects immediately with [`CircuitBreakerError::Open`] while the
    /// circuit is open and the recovery timeout has not yet elapsed. The
    /// operation itself is bounded by the configured call timeout.
    pub async fn call<T, F>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: Future<Output = Result<T, BoxError>>,
    {
        self.check_state()?;

        match tokio::time::timeout(self.config.call_timeout, operation).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                let expected = self
                    .config
                    .failure_classifier
                    .as_ref()
                    .is_some_and(|classify| classify(&error));
                self.on_failure(expected, &error.to_string());
                Err(CircuitBreakerError::Operation(error))
            }
            Err(_) => {
                self.on_failure(false, "call timed out");
                Err(CircuitBreakerError::Timeout {
                    service: self.name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Snapshot of state and counters.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock_inner();
        let changes = &inner.stats.state_changes;
        let recent_start = changes.len().saturating_sub(10);
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.stats.failure_count,
            success_count: inner.stats.success_count,
            total_requests: inner.stats.total_requests,
            failure_rate: inner.stats.failure_rate(),
            last_failure_time: inner.stats.last_failure_time,
            last_success_time: inner.stats.last_success_time,
            recent_state_changes: changes[recent_start..].to_vec(),
            created_at: inner.stats.created_at,
        }
    }

    /// Force the breaker back to closed, discarding all stats.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.stats = CircuitBreakerStats::new();
        inner.last_failure_at = None;
        inner.half_open_successes = 0;
        tracing::info!(breaker = %self.name, %from, "circuit breaker manually reset");
    }

    /// Reject or admit the call, transitioning open circuits to half-open
    /// once the recovery timeout has elapsed.
    fn check_state(&self) -> Result<(), CircuitBreakerError> {
        let mut inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure_at
            .map(|at| self.clock.now().saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            inner
                .stats
                .record_state_change(CircuitState::Open, CircuitState::HalfOpen);
            tracing::info!(breaker = %self.name, "circuit breaker probing recovery");
            return Ok(());
        }

        let retry_after = self
            .config
            .recovery_timeout
            .saturating_sub(elapsed)
            .as_secs();
        Err(CircuitBreakerError::Open {
            service: self.name.clone(),
            retry_after,
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock_inner();
        inner.stats.record_success();

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.half_open_successes = 0;
                inner.last_failure_at = None;
                inner
                    .stats
                    .record_state_change(CircuitState::HalfOpen, CircuitState::Closed);
                // Start the new closed period with clean counters so a stale
                // failure count cannot immediately reopen the circuit.
                inner.stats.reset_counters();
                tracing::info!(breaker = %self.name, "circuit breaker closed after recovery");
            }
        }
    }

    fn on_failure(&self, expected: bool, detail: &str) {
        let mut inner = self.lock_inner();
        inner.stats.record_failure();
        inner.last_failure_at = Some(self.clock.now());

        if expected {
            tracing::warn!(breaker = %self.name, detail, "expected failure recorded");
        } else {
            tracing::error!(breaker = %self.name, detail, "failure recorded");
        }

        match inner.state {
            CircuitState::Closed => {
                if inner.stats.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner
                        .stats
                        .record_state_change(CircuitState::Closed, CircuitState::Open);
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.stats.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                inner
                    .stats
                    .record_state_change(CircuitState::HalfOpen, CircuitState::Open);
                tracing::warn!(breaker = %self.name, "circuit breaker reopened during recovery");
            }
            CircuitState::Open => {}
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
