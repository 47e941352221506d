//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Counter store implementations (in-memory, Redis)

pub mod clock;
pub mod memory_store;

#[cfg(feature = "redis-storage")]
pub mod redis_store;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. It provides controllable test doubles for
/// deterministic time-based tests.
///
/// To use these mocks in downstream tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// plantcare-core = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
