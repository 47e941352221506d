//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Circuit breakers and their registry (protecting external calls)
//! - Rate limiter (admission decisions over a counter store)
//! - Event bus and event store (decoupled module communication)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod event_bus;
pub mod event_store;
pub mod ports;
pub mod rate_limiter;
pub mod registry;
