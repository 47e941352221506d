//! Async event bus with a worker pool, retries and an audit log.
//!
//! Events are published onto an unbounded queue and dispatched by a pool of
//! worker tasks to subscribed handlers. Every published event is appended to
//! the [`EventStore`] before it is enqueued, so the audit log is complete
//! even when handlers fail.
//!
//! Dispatch order within one event is deterministic: subscriptions run in
//! descending priority, ties broken by subscription order. Failed handler
//! invocations are retried with exponential backoff; once retries are
//! exhausted the handler's `on_error` hook runs exactly once.

use crate::application::event_store::{EventFilter, EventStore};
use crate::application::ports::{EventHandler, HandlerError, HandlerFailureKind};
use crate::domain::event::DomainEvent;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Errors from event bus configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusConfigError {
    #[error("worker_count must be at least 1")]
    ZeroWorkerCount,
    #[error("poll_interval must be greater than zero")]
    ZeroPollInterval,
    #[error("publish_wait_timeout must be greater than zero")]
    ZeroPublishWaitTimeout,
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Number of worker tasks draining the queue.
    pub worker_count: usize,
    /// How long an idle worker waits for an event before rechecking the
    /// running flag.
    pub poll_interval: Duration,
    /// Base delay for retry backoff; attempt `n` waits `base * 2^n`.
    pub retry_base_delay: Duration,
    /// Upper bound on how long `publish_and_wait` blocks for the queue to
    /// drain.
    pub publish_wait_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            poll_interval: Duration::from_secs(1),
            retry_base_delay: Duration::from_secs(1),
            publish_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl EventBusConfig {
    fn validate(&self) -> Result<(), BusConfigError> {
        if self.worker_count == 0 {
            return Err(BusConfigError::ZeroWorkerCount);
        }
        if self.poll_interval.is_zero() {
            return Err(BusConfigError::ZeroPollInterval);
        }
        if self.publish_wait_timeout.is_zero() {
            return Err(BusConfigError::ZeroPublishWaitTimeout);
        }
        Ok(())
    }
}

/// Per-subscription dispatch settings.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Higher runs earlier for the same event.
    pub priority: i32,
    /// Retries after the first failed attempt.
    pub retry_count: u32,
    /// Per-attempt timeout; `None` lets the handler run unbounded.
    pub timeout: Option<Duration>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: 1,
            retry_count: 3,
            timeout: None,
        }
    }
}

#[derive(Clone)]
struct EventSubscription {
    handler: Arc<dyn EventHandler>,
    priority: i32,
    retry_count: u32,
    timeout: Option<Duration>,
    /// Registration order, breaks priority ties.
    seq: u64,
}

/// Read-only view of one subscription, for introspection endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub handler: String,
    pub priority: i32,
    pub retry_count: u32,
    pub timeout: Option<Duration>,
}

/// Counter snapshot of the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Successful handler invocations.
    pub processed: u64,
    /// Handler invocations that exhausted their retries.
    pub failed: u64,
    /// Retry attempts performed.
    pub retries: u64,
    /// Events enqueued or currently being dispatched.
    pub queue_depth: u64,
    pub worker_count: usize,
    pub subscription_count: usize,
    /// Event types with at least one subscription, sorted.
    pub event_types: Vec<String>,
}

/// Liveness report of the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusHealth {
    pub running: bool,
    pub workers_alive: usize,
    pub queue_depth: u64,
}

/// Error returned when publishing to a bus whose queue has been closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event bus queue is closed")]
pub struct QueueClosed;

struct BusShared {
    config: EventBusConfig,
    subscriptions: DashMap<String, Vec<EventSubscription>>,
    store: EventStore,
    running: AtomicBool,
    /// Events enqueued or in flight; `drained` fires when this reaches zero.
    pending: AtomicU64,
    drained: Notify,
    seq: AtomicU64,
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    tx: UnboundedSender<DomainEvent>,
    rx: tokio::sync::Mutex<UnboundedReceiver<DomainEvent>>,
}

/// Async event bus.
///
/// Cheap to share behind an [`Arc`]. Publishing works before `start` is
/// called; events accumulate in the queue until workers come up.
pub struct EventBus {
    shared: Arc<BusShared>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with a validated configuration.
    pub fn new(config: EventBusConfig) -> Result<Self, BusConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EventBusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(BusShared {
                config,
                subscriptions: DashMap::new(),
                store: EventStore::new(),
                running: AtomicBool::new(false),
                pending: AtomicU64::new(0),
                drained: Notify::new(),
                seq: AtomicU64::new(0),
                published: AtomicU64::new(0),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                tx,
                rx: tokio::sync::Mutex::new(rx),
            }),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a handler for its declared event type with default options.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.subscribe_with(handler, SubscribeOptions::default());
    }

    /// Register a handler with explicit dispatch options.
    pub fn subscribe_with(&self, handler: Arc<dyn EventHandler>, options: SubscribeOptions) {
        let event_type = handler.event_type().to_string();
        let subscription = EventSubscription {
            priority: options.priority,
            retry_count: options.retry_count,
            timeout: options.timeout,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            handler,
        };
        tracing::debug!(
            event_type = %event_type,
            handler = subscription.handler.name(),
            priority = subscription.priority,
            "handler subscribed"
        );
        self.shared
            .subscriptions
            .entry(event_type)
            .or_default()
            .push(subscription);
    }

    /// Remove a handler registration. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) -> bool {
        let event_type = handler.event_type().to_string();
        let Some(mut entry) = self.shared.subscriptions.get_mut(&event_type) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|sub| !Arc::ptr_eq(&sub.handler, handler));
        let removed = entry.len() < before;
        drop(entry);
        // Checked under the map lock: a subscription added between the drop
        // and this call keeps the entry alive.
        self.shared
            .subscriptions
            .remove_if(&event_type, |_, subs| subs.is_empty());
        removed
    }

    /// Publish an event.
    ///
    /// The event is appended to the store before it is enqueued, so even an
    /// event no handler consumes is auditable.
    pub fn publish(&self, event: DomainEvent) -> Result<(), QueueClosed> {
        self.shared.store.append(event.clone());
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared.tx.send(event).map_err(|_| {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            QueueClosed
        })
    }

    /// Publish an event and wait for the queue to drain.
    ///
    /// Returns `Ok(true)` once all queued events (not just this one) have
    /// been dispatched, `Ok(false)` if the configured wait timeout elapsed
    /// first.
    pub async fn publish_and_wait(&self, event: DomainEvent) -> Result<bool, QueueClosed> {
        self.publish(event)?;
        let deadline = tokio::time::Instant::now() + self.shared.config.publish_wait_timeout;

        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between the check and
            // the await is not lost.
            notified.as_mut().enable();

            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return Ok(true);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(
                    queue_depth = self.shared.pending.load(Ordering::Acquire),
                    "timed out waiting for event queue to drain"
                );
                return Ok(false);
            }
        }
    }

    /// Start the worker pool. A second call on a running bus is a no-op.
    pub async fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            tracing::warn!("event bus already running");
            return;
        }
        let mut workers = self.lock_workers();
        for worker_id in 0..self.shared.config.worker_count {
            let shared = self.shared.clone();
            workers.push(tokio::spawn(worker_loop(shared, worker_id)));
        }
        tracing::info!(
            workers = self.shared.config.worker_count,
            "event bus started"
        );
    }

    /// Stop the worker pool cooperatively.
    ///
    /// Workers finish the event they are dispatching, then exit at the next
    /// poll. Events left on the queue stay there and are picked up again
    /// after a restart.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let workers: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        for worker in workers {
            if let Err(error) = worker.await {
                tracing::warn!(%error, "event bus worker panicked");
            }
        }
        tracing::info!(
            queue_depth = self.shared.pending.load(Ordering::Acquire),
            "event bus stopped"
        );
    }

    /// Counter snapshot.
    pub fn get_stats(&self) -> BusStats {
        let mut event_types: Vec<String> = self
            .shared
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        event_types.sort();
        let subscription_count = self
            .shared
            .subscriptions
            .iter()
            .map(|entry| entry.value().len())
            .sum();
        BusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            processed: self.shared.processed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            retries: self.shared.retries.load(Ordering::Relaxed),
            queue_depth: self.shared.pending.load(Ordering::Acquire),
            worker_count: self.lock_workers().len(),
            subscription_count,
            event_types,
        }
    }

    /// Subscriptions per event type, in dispatch order.
    pub fn get_subscriptions(&self) -> BTreeMap<String, Vec<SubscriptionInfo>> {
        self.shared
            .subscriptions
            .iter()
            .map(|entry| {
                let mut subs = entry.value().clone();
                sort_for_dispatch(&mut subs);
                let infos = subs
                    .iter()
                    .map(|sub| SubscriptionInfo {
                        handler: sub.handler.name().to_string(),
                        priority: sub.priority,
                        retry_count: sub.retry_count,
                        timeout: sub.timeout,
                    })
                    .collect();
                (entry.key().clone(), infos)
            })
            .collect()
    }

    /// Liveness report.
    pub fn health_check(&self) -> BusHealth {
        let workers_alive = self
            .lock_workers()
            .iter()
            .filter(|worker| !worker.is_finished())
            .count();
        BusHealth {
            running: self.shared.running.load(Ordering::Acquire),
            workers_alive,
            queue_depth: self.shared.pending.load(Ordering::Acquire),
        }
    }

    /// Query the audit log.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<DomainEvent> {
        self.shared.store.get_events(filter)
    }

    /// Number of events in the audit log.
    pub fn event_count(&self) -> usize {
        self.shared.store.event_count()
    }

    /// Clear the audit log. Does not touch the queue.
    pub fn clear_events(&self) {
        self.shared.store.clear();
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::build(EventBusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .field("queue_depth", &self.shared.pending.load(Ordering::Relaxed))
            .field("config", &self.shared.config)
            .finish()
    }
}

fn sort_for_dispatch(subscriptions: &mut [EventSubscription]) {
    subscriptions.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
}

async fn worker_loop(shared: Arc<BusShared>, worker_id: usize) {
    tracing::debug!(worker_id, "event bus worker started");
    while shared.running.load(Ordering::Acquire) {
        // Hold the receiver lock only while polling, so other workers can
        // pick up events while this one dispatches.
        let polled = {
            let mut rx = shared.rx.lock().await;
            tokio::time::timeout(shared.config.poll_interval, rx.recv()).await
        };
        match polled {
            Ok(Some(mut event)) => {
                shared.process_event(&mut event, worker_id).await;
                if shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    shared.drained.notify_waiters();
                }
            }
            Ok(None) => break,
            Err(_) => {}
        }
    }
    tracing::debug!(worker_id, "event bus worker stopped");
}

impl BusShared {
    async fn process_event(&self, event: &mut DomainEvent, worker_id: usize) {
        if event.correlation_id().is_none() {
            let correlation_id = event.event_id.to_string();
            event.set_correlation_id(&correlation_id);
        }

        let subscriptions = match self.subscriptions.get(&event.event_type) {
            Some(entry) => {
                let mut subs = entry.value().clone();
                sort_for_dispatch(&mut subs);
                subs
            }
            None => {
                tracing::debug!(
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    "no handlers for event"
                );
                return;
            }
        };

        tracing::debug!(
            worker_id,
            event_type = %event.event_type,
            event_id = %event.event_id,
            handlers = subscriptions.len(),
            "dispatching event"
        );
        for subscription in &subscriptions {
            self.execute_handler(subscription, event).await;
        }
    }

    async fn execute_handler(&self, subscription: &EventSubscription, event: &DomainEvent) {
        let attempts = subscription.retry_count + 1;
        let mut last_failure = HandlerFailureKind::Rejected;

        for attempt in 0..attempts {
            match self.run_attempt(subscription, event).await {
                Ok(()) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        tracing::debug!(
                            handler = subscription.handler.name(),
                            event_id = %event.event_id,
                            attempt = attempt + 1,
                            "handler succeeded after retry"
                        );
                    }
                    return;
                }
                Err(kind) => {
                    last_failure = kind;
                    if attempt + 1 < attempts {
                        self.retries.fetch_add(1, Ordering::Relaxed);
                        let backoff = self
                            .config
                            .retry_base_delay
                            .saturating_mul(1u32 << attempt.min(16));
                        tracing::debug!(
                            handler = subscription.handler.name(),
                            event_id = %event.event_id,
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            failure = %last_failure,
                            "handler attempt failed, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        self.failed.fetch_add(1, Ordering::Relaxed);
        let error = HandlerError {
            handler: subscription.handler.name().to_string(),
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            attempts,
            kind: last_failure,
        };
        subscription.handler.on_error(event, &error).await;
    }

    async fn run_attempt(
        &self,
        subscription: &EventSubscription,
        event: &DomainEvent,
    ) -> Result<(), HandlerFailureKind> {
        let attempt = subscription.handler.handle(event);
        let result = match subscription.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => return Err(HandlerFailureKind::Timeout),
            },
            None => attempt.await,
        };
        match result {
            Ok(true) => Ok(()),
            Ok(false) => Err(HandlerFailureKind::Rejected),
            Err(error) => Err(HandlerFailureKind::Failed(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn test_config() -> EventBusConfig {
        EventBusConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(10),
            retry_base_delay: Duration::from_millis(1),
            publish_wait_timeout: Duration::from_secs(2),
        }
    }

    struct RecordingHandler {
        name: String,
        event_type: String,
        invocations: AtomicUsize,
        /// Attempts that fail before the handler starts succeeding.
        failures_before_success: usize,
        errors_seen: AtomicUsize,
        order_log: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl RecordingHandler {
        fn new(name: &str, event_type: &str) -> Self {
            Self {
                name: name.to_string(),
                event_type: event_type.to_string(),
                invocations: AtomicUsize::new(0),
                failures_before_success: 0,
                errors_seen: AtomicUsize::new(0),
                order_log: None,
            }
        }

        fn failing(name: &str, event_type: &str, failures: usize) -> Self {
            Self {
                failures_before_success: failures,
                ..Self::new(name, event_type)
            }
        }

        fn logging(name: &str, event_type: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                order_log: Some(log),
                ..Self::new(name, event_type)
            }
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn event_type(&self) -> &str {
            &self.event_type
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<bool, BoxError> {
            let attempt = self.invocations.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &self.order_log {
                log.lock().unwrap().push(self.name.clone());
            }
            if attempt < self.failures_before_success {
                return Err("transient failure".into());
            }
            Ok(true)
        }

        async fn on_error(&self, _event: &DomainEvent, _error: &HandlerError) {
            self.errors_seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn plant_event() -> DomainEvent {
        DomainEvent::new("plant.added", "plant-1", "plant")
    }

    #[test]
    fn test_config_validation() {
        let err = EventBus::new(EventBusConfig {
            worker_count: 0,
            ..test_config()
        })
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err, BusConfigError::ZeroWorkerCount);

        let err = EventBus::new(EventBusConfig {
            poll_interval: Duration::ZERO,
            ..test_config()
        })
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err, BusConfigError::ZeroPollInterval);
    }

    #[tokio::test]
    async fn test_publish_without_workers_queues_and_stores() {
        let bus = EventBus::new(test_config()).unwrap();
        bus.publish(plant_event()).unwrap();

        assert_eq!(bus.event_count(), 1);
        let stats = bus.get_stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.queue_depth, 1);
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_publish_and_wait_dispatches() {
        let bus = EventBus::new(test_config()).unwrap();
        let handler = Arc::new(RecordingHandler::new("recorder", "plant.added"));
        bus.subscribe(handler.clone());
        bus.start().await;

        let drained = bus.publish_and_wait(plant_event()).await.unwrap();
        assert!(drained);
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);

        let stats = bus.get_stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.queue_depth, 0);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_queued_events_processed_after_start() {
        let bus = EventBus::new(test_config()).unwrap();
        let handler = Arc::new(RecordingHandler::new("recorder", "plant.added"));
        bus.subscribe(handler.clone());

        for _ in 0..3 {
            bus.publish(plant_event()).unwrap();
        }
        bus.start().await;
        assert!(bus.publish_and_wait(plant_event()).await.unwrap());

        assert_eq!(handler.invocations.load(Ordering::SeqCst), 4);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_priority_order_within_event() {
        let bus = EventBus::new(EventBusConfig {
            worker_count: 1,
            ..test_config()
        })
        .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = Arc::new(RecordingHandler::logging("low", "plant.added", log.clone()));
        let high = Arc::new(RecordingHandler::logging("high", "plant.added", log.clone()));
        bus.subscribe_with(
            low,
            SubscribeOptions {
                priority: 1,
                ..SubscribeOptions::default()
            },
        );
        bus.subscribe_with(
            high,
            SubscribeOptions {
                priority: 5,
                ..SubscribeOptions::default()
            },
        );
        bus.start().await;

        for _ in 0..3 {
            assert!(bus.publish_and_wait(plant_event()).await.unwrap());
        }
        bus.stop().await;

        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["high", "low", "high", "low", "high", "low"]);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let bus = EventBus::new(test_config()).unwrap();
        let handler = Arc::new(RecordingHandler::failing("flaky", "plant.added", 2));
        bus.subscribe_with(
            handler.clone(),
            SubscribeOptions {
                retry_count: 3,
                ..SubscribeOptions::default()
            },
        );
        bus.start().await;

        assert!(bus.publish_and_wait(plant_event()).await.unwrap());
        bus.stop().await;

        assert_eq!(handler.invocations.load(Ordering::SeqCst), 3);
        assert_eq!(handler.errors_seen.load(Ordering::SeqCst), 0);
        let stats = bus.get_stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_calls_on_error_once() {
        let bus = EventBus::new(test_config()).unwrap();
        let handler = Arc::new(RecordingHandler::failing("broken", "plant.added", usize::MAX));
        bus.subscribe_with(
            handler.clone(),
            SubscribeOptions {
                retry_count: 2,
                ..SubscribeOptions::default()
            },
        );
        bus.start().await;

        assert!(bus.publish_and_wait(plant_event()).await.unwrap());
        bus.stop().await;

        assert_eq!(handler.invocations.load(Ordering::SeqCst), 3);
        assert_eq!(handler.errors_seen.load(Ordering::SeqCst), 1);
        let stats = bus.get_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 0);
    }

    struct SlowHandler;

    #[async_trait]
    impl EventHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        fn event_type(&self) -> &str {
            "plant.added"
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<bool, BoxError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_handler_timeout_is_a_failure() {
        let bus = EventBus::new(test_config()).unwrap();
        bus.subscribe_with(
            Arc::new(SlowHandler),
            SubscribeOptions {
                retry_count: 0,
                timeout: Some(Duration::from_millis(5)),
                ..SubscribeOptions::default()
            },
        );
        bus.start().await;

        assert!(bus.publish_and_wait(plant_event()).await.unwrap());
        bus.stop().await;

        assert_eq!(bus.get_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_remaining_handlers() {
        let bus = EventBus::new(test_config()).unwrap();
        let first: Arc<dyn EventHandler> =
            Arc::new(RecordingHandler::new("first", "plant.added"));
        let second = Arc::new(RecordingHandler::new("second", "plant.added"));
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        assert!(bus.unsubscribe(&first));
        // The event type still has a live subscription and must keep
        // dispatching.
        assert_eq!(bus.get_stats().event_types, vec!["plant.added"]);
        bus.start().await;
        assert!(bus.publish_and_wait(plant_event()).await.unwrap());
        bus.stop().await;
        assert_eq!(second.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new(test_config()).unwrap();
        let handler: Arc<dyn EventHandler> =
            Arc::new(RecordingHandler::new("recorder", "plant.added"));
        bus.subscribe(handler.clone());
        assert_eq!(bus.get_stats().subscription_count, 1);

        assert!(bus.unsubscribe(&handler));
        assert!(!bus.unsubscribe(&handler));
        let stats = bus.get_stats();
        assert_eq!(stats.subscription_count, 0);
        assert!(stats.event_types.is_empty());
    }

    #[tokio::test]
    async fn test_get_subscriptions_in_dispatch_order() {
        let bus = EventBus::new(test_config()).unwrap();
        bus.subscribe_with(
            Arc::new(RecordingHandler::new("low", "plant.added")),
            SubscribeOptions {
                priority: 1,
                retry_count: 0,
                timeout: None,
            },
        );
        bus.subscribe_with(
            Arc::new(RecordingHandler::new("high", "plant.added")),
            SubscribeOptions {
                priority: 9,
                retry_count: 5,
                timeout: Some(Duration::from_secs(1)),
            },
        );

        let subs = bus.get_subscriptions();
        let plant_subs = &subs["plant.added"];
        assert_eq!(plant_subs[0].handler, "high");
        assert_eq!(plant_subs[0].retry_count, 5);
        assert_eq!(plant_subs[1].handler, "low");
    }

    #[tokio::test]
    async fn test_stop_leaves_queue_intact() {
        let bus = EventBus::new(test_config()).unwrap();
        let handler = Arc::new(RecordingHandler::new("recorder", "plant.added"));
        bus.subscribe(handler.clone());

        bus.publish(plant_event()).unwrap();
        bus.stop().await; // never started, no-op
        assert_eq!(bus.get_stats().queue_depth, 1);

        bus.start().await;
        assert!(bus.publish_and_wait(plant_event()).await.unwrap());
        bus.stop().await;
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 2);

        let health = bus.health_check();
        assert!(!health.running);
        assert_eq!(health.workers_alive, 0);
    }

    #[tokio::test]
    async fn test_health_check_while_running() {
        let bus = EventBus::new(test_config()).unwrap();
        bus.start().await;
        let health = bus.health_check();
        assert!(health.running);
        assert_eq!(health.workers_alive, 2);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_correlation_id_assigned_during_dispatch() {
        let bus = EventBus::new(test_config()).unwrap();
        bus.subscribe(Arc::new(RecordingHandler::new("recorder", "plant.added")));
        bus.start().await;

        let event = plant_event();
        let preset = {
            let mut event = plant_event();
            event.set_correlation_id("req-7");
            event
        };
        bus.publish_and_wait(event).await.unwrap();
        bus.publish_and_wait(preset.clone()).await.unwrap();
        bus.stop().await;

        // The stored copy keeps whatever the publisher set.
        let stored = bus.get_events(&EventFilter::of_type("plant.added"));
        assert_eq!(stored.len(), 2);
        assert!(stored
            .iter()
            .any(|e| e.correlation_id() == Some("req-7")));
    }

    #[tokio::test]
    async fn test_audit_log_filtering() {
        let bus = EventBus::new(test_config()).unwrap();
        for i in 0..3 {
            bus.publish(DomainEvent::new("plant.added", format!("plant-{i}"), "plant"))
                .unwrap();
        }
        for _ in 0..2 {
            bus.publish(DomainEvent::new("user.registered", "user-1", "user"))
                .unwrap();
        }

        assert_eq!(bus.get_events(&EventFilter::of_type("plant.added")).len(), 3);
        assert_eq!(bus.get_events(&EventFilter::aggregate("user-1")).len(), 2);
        assert_eq!(bus.event_count(), 5);

        bus.clear_events();
        assert_eq!(bus.event_count(), 0);
    }
}
