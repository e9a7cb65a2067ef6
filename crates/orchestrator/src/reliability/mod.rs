//! Librarian Reliability Module
//!
//! Circuit breakers isolating each librarian from cascading failure, and the
//! manager that owns them.

pub mod breaker_manager;
pub mod circuit_breaker;

pub use breaker_manager::BreakerManager;
pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerStats, CircuitOpen};
