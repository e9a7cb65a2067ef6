//! Per-librarian resilience and caching settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through normally
    #[default]
    Closed,

    /// Calls are rejected until the cooldown elapses
    Open,

    /// Probe calls are let through to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for a windowed failure-rate circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Failure rate (0.0 to 1.0) at which the circuit opens
    pub failure_threshold: f64,

    /// Minimum number of samples in the window before the rate is judged
    pub volume_threshold: u32,

    /// Rolling window length in milliseconds
    pub window_size_ms: u64,

    /// Cooldown before an open circuit lets a probe through, in milliseconds
    pub timeout_ms: u64,

    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            volume_threshold: 20,
            window_size_ms: 60_000,
            timeout_ms: 60_000,
            success_threshold: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window_size(&self) -> Duration {
        Duration::from_millis(self.window_size_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the reason the configuration is unusable, if any
    pub fn validation_error(&self) -> Option<String> {
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Some(format!(
                "failure threshold must be within 0.0..=1.0, got {}",
                self.failure_threshold
            ));
        }
        if self.volume_threshold == 0 {
            return Some("volume threshold must be at least 1".to_string());
        }
        if self.success_threshold == 0 {
            return Some("success threshold must be at least 1".to_string());
        }
        if self.window_size_ms == 0 {
            return Some("window size must be positive".to_string());
        }
        None
    }
}

/// Response caching settings of a single librarian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub enabled: bool,
    /// Overrides the engine-wide TTL when set
    pub ttl_ms: Option<u64>,
    pub tags: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: None,
            tags: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}
