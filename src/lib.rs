//! # plantcare-core
//!
//! Resilience and event-coordination core for plant-care backends.
//!
//! Three building blocks shared by every feature module:
//!
//! - **Circuit breakers** protect calls to external services (weather APIs,
//!   plant identification, mail). A run of failures opens the circuit and
//!   callers fail fast until the service recovers.
//! - **Sliding-window rate limiter** admits or rejects requests per user,
//!   IP or API key over rolling windows, backed by an in-process store or
//!   Redis for multi-instance deployments.
//! - **Async event bus** decouples modules: publish a domain event, let
//!   subscribed handlers react on a worker pool with retries and an audit
//!   log of everything published.
//!
//! ## Circuit breaker
//!
//! ```rust,no_run
//! use plantcare_core::{BoxError, CircuitBreaker, CircuitBreakerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let breaker = CircuitBreaker::new("weather-api", CircuitBreakerConfig::default());
//!
//!     let forecast = breaker
//!         .call(async { Ok::<_, BoxError>("sunny, water in the evening") })
//!         .await;
//!     match forecast {
//!         Ok(text) => println!("{text}"),
//!         Err(error) => eprintln!("weather unavailable: {error}"),
//!     }
//! }
//! ```
//!
//! ## Rate limiting
//!
//! ```rust,no_run
//! use plantcare_core::{MemoryCounterStore, RateLimiter, RateLimitWindow};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new(MemoryCounterStore::new());
//!
//!     let result = limiter
//!         .check("user-1", 100, RateLimitWindow::Hour, Some("identify"))
//!         .await
//!         .unwrap();
//!     if !result.allowed {
//!         println!("slow down, retry in {:?}s", result.retry_after);
//!     }
//! }
//! ```
//!
//! For distributed deployments enable the `redis-storage` feature and swap
//! in `RedisCounterStore`; the limiter logic is identical. If the backend
//! becomes unreachable the limiter fails open: requests are admitted and a
//! warning is logged.
//!
//! ## Event bus
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use plantcare_core::{BoxError, DomainEvent, EventBus, EventBusConfig, EventHandler};
//! use std::sync::Arc;
//!
//! struct CareReminder;
//!
//! #[async_trait]
//! impl EventHandler for CareReminder {
//!     fn name(&self) -> &str {
//!         "care-reminder"
//!     }
//!
//!     fn event_type(&self) -> &str {
//!         "plant.added"
//!     }
//!
//!     async fn handle(&self, event: &DomainEvent) -> Result<bool, BoxError> {
//!         println!("scheduling care reminders for {}", event.aggregate_id);
//!         Ok(true)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::new(EventBusConfig::default()).unwrap();
//!     bus.subscribe(Arc::new(CareReminder));
//!     bus.start().await;
//!
//!     let event = DomainEvent::plant_added("plant-1", "user-1", "Freddie", "Ficus lyrata")
//!         .unwrap();
//!     bus.publish_and_wait(event).await.unwrap();
//!     bus.stop().await;
//! }
//! ```
//!
//! ## Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - `domain` holds pure types (events, rules, results) with no I/O.
//! - `application` holds the orchestration logic and the ports
//!   ([`Clock`], [`CounterStore`], [`EventHandler`]) it depends on.
//! - `infrastructure` holds the adapters implementing those ports.
//!
//! Everything is instrumented with `tracing`; the crate never installs a
//! subscriber, that is the host application's call.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    event::{DomainEvent, EventError, EventPriority},
    rule::{RateLimitExceeded, RateLimitResult, RateLimitRule, RateLimitWindow, RuleError},
};

pub use application::{
    circuit_breaker::{
        BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
        CircuitBreakerStats, CircuitState, StateChange,
    },
    event_bus::{
        BusConfigError, BusHealth, BusStats, EventBus, EventBusConfig, QueueClosed,
        SubscribeOptions, SubscriptionInfo,
    },
    event_store::{EventFilter, EventStore},
    ports::{
        BoxError, Clock, CounterStore, EventHandler, HandlerError, HandlerFailureKind,
        StoreError, WindowCheck,
    },
    rate_limiter::{RateLimitError, RateLimiter, StoreHealth, UsageStats},
    registry::CircuitBreakerRegistry,
};

pub use infrastructure::{clock::SystemClock, memory_store::MemoryCounterStore};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::RedisCounterStore;
