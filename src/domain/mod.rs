//! Domain layer - pure types with no external I/O.
//!
//! This layer contains the core concepts and invariants of the resilience
//! infrastructure:
//! - Domain events and their typed constructors
//! - Rate-limit rules, windows and check results
//!
//! All types in this layer are pure and easily testable.

pub mod event;
pub mod rule;
