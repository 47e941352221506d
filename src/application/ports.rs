//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::event::DomainEvent;
use async_trait::async_trait;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Boxed error type used at the handler and operation boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant, for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Get the current Unix timestamp in seconds, for window arithmetic
    /// and reset times exposed to callers.
    fn unix_now(&self) -> u64;
}

/// Error returned by a [`CounterStore`] when the backend is unreachable
/// or misbehaving. The rate limiter treats this as a fail-open signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not serve the request.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of one atomic check-and-record operation on a window log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    /// Whether the request was admitted and recorded.
    pub allowed: bool,
    /// Number of entries in the window *before* this request.
    pub count: u64,
    /// Unix timestamp of the oldest entry in the window, if any.
    /// Used to compute retry-after on rejection.
    pub oldest: Option<u64>,
}

/// Port for sliding-window request counting.
///
/// Implementations must make `check_and_record` atomic per key: under
/// concurrent calls at the limit boundary, exactly one caller is admitted
/// for the last slot. Infrastructure provides concrete implementations
/// (MemoryCounterStore, RedisCounterStore).
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Atomically prune entries older than the window, compare the count
    /// against the limit and record the request if admitted.
    async fn check_and_record(
        &self,
        key: &str,
        window_seconds: u64,
        limit: u32,
        now: u64,
    ) -> Result<WindowCheck, StoreError>;

    /// Read the timestamps currently inside the window, oldest first,
    /// without recording anything.
    async fn entries(
        &self,
        key: &str,
        window_seconds: u64,
        now: u64,
    ) -> Result<Vec<u64>, StoreError>;

    /// Drop the window log for a key.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys starting with the given prefix.
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check backend connectivity.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    async fn check_and_record(
        &self,
        key: &str,
        window_seconds: u64,
        limit: u32,
        now: u64,
    ) -> Result<WindowCheck, StoreError> {
        (**self)
            .check_and_record(key, window_seconds, limit, now)
            .await
    }

    async fn entries(
        &self,
        key: &str,
        window_seconds: u64,
        now: u64,
    ) -> Result<Vec<u64>, StoreError> {
        (**self).entries(key, window_seconds, now).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).scan_keys(prefix).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}

/// How a handler invocation ultimately failed after all retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerFailureKind {
    /// The handler did not complete within its configured timeout.
    Timeout,
    /// The handler completed but reported it could not process the event.
    Rejected,
    /// The handler returned an error.
    Failed(String),
}

impl fmt::Display for HandlerFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFailureKind::Timeout => f.write_str("timed out"),
            HandlerFailureKind::Rejected => f.write_str("rejected the event"),
            HandlerFailureKind::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

/// Error handed to [`EventHandler::on_error`] after retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler `{handler}` failed for event {event_id} ({event_type}) after {attempts} attempts: {kind}")]
pub struct HandlerError {
    /// Name of the failing handler.
    pub handler: String,
    /// Id of the event being processed.
    pub event_id: Uuid,
    /// Type of the event being processed.
    pub event_type: String,
    /// Total attempts made, including the first.
    pub attempts: u32,
    /// Final failure classification.
    pub kind: HandlerFailureKind,
}

/// Port for event consumers.
///
/// A handler subscribes to one event type and is invoked by the bus
/// workers for each matching event. Returning `Ok(true)` marks success,
/// `Ok(false)` marks a rejection (retried like an error) and `Err` marks
/// a failure. After retries are exhausted, [`EventHandler::on_error`] is
/// called exactly once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Human-readable name used in logs and error reports.
    fn name(&self) -> &str;

    /// Event type this handler consumes, e.g. `"plant.added"`.
    fn event_type(&self) -> &str;

    /// Process one event.
    async fn handle(&self, event: &DomainEvent) -> Result<bool, BoxError>;

    /// Called once after all retries for an event have failed.
    ///
    /// The default implementation logs the failure.
    async fn on_error(&self, event: &DomainEvent, error: &HandlerError) {
        tracing::error!(
            handler = self.name(),
            event_id = %event.event_id,
            event_type = %event.event_type,
            %error,
            "event handler failed permanently"
        );
    }
}
