//! Engine-wide configuration
//!
//! Loaded from YAML, then overridden by `ATHENAEUM_*` environment variables.

use crate::errors::{ConfigError, ConfigResult};
use athenaeum_core::{CircuitBreakerConfig, EventBus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "ATHENAEUM_";

/// Engine settings; YAML keys are camelCase like the nested breaker block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-call timeout used when the request carries no budget
    pub default_timeout_ms: u64,
    pub max_delegation_depth: usize,
    pub cache_enabled: bool,
    /// TTL for librarians without their own cache TTL
    pub cache_ttl_ms: u64,
    /// Events buffered per subscriber
    pub event_capacity: usize,
    /// Breaker settings for librarians without their own
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_delegation_depth: 5,
            cache_enabled: true,
            cache_ttl_ms: 300_000,
            event_capacity: 1024,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ATHENAEUM_*` overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("DEFAULT_TIMEOUT_MS") {
            self.default_timeout_ms = parse_value("DEFAULT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = var("MAX_DELEGATION_DEPTH") {
            self.max_delegation_depth = parse_value("MAX_DELEGATION_DEPTH", &value)?;
        }
        if let Some(value) = var("CACHE_ENABLED") {
            self.cache_enabled = parse_value("CACHE_ENABLED", &value)?;
        }
        if let Some(value) = var("CACHE_TTL_MS") {
            self.cache_ttl_ms = parse_value("CACHE_TTL_MS", &value)?;
        }
        if let Some(value) = var("EVENT_CAPACITY") {
            self.event_capacity = parse_value("EVENT_CAPACITY", &value)?;
        }
        if let Some(value) = var("BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold =
                parse_value("BREAKER_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = var("BREAKER_VOLUME_THRESHOLD") {
            self.circuit_breaker.volume_threshold =
                parse_value("BREAKER_VOLUME_THRESHOLD", &value)?;
        }
        if let Some(value) = var("BREAKER_WINDOW_MS") {
            self.circuit_breaker.window_size_ms = parse_value("BREAKER_WINDOW_MS", &value)?;
        }
        if let Some(value) = var("BREAKER_TIMEOUT_MS") {
            self.circuit_breaker.timeout_ms = parse_value("BREAKER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = var("BREAKER_SUCCESS_THRESHOLD") {
            self.circuit_breaker.success_threshold =
                parse_value("BREAKER_SUCCESS_THRESHOLD", &value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::validation("default_timeout_ms must be positive"));
        }
        if self.max_delegation_depth == 0 {
            return Err(ConfigError::validation(
                "max_delegation_depth must be at least 1",
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::validation("event_capacity must be at least 1"));
        }
        if let Some(reason) = self.circuit_breaker.validation_error() {
            return Err(ConfigError::validation(format!("circuit_breaker: {reason}")));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Event bus sized by `event_capacity`
    pub fn event_bus(&self) -> EventBus {
        EventBus::new(self.event_capacity)
    }
}

fn parse_value<T>(name: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ConfigError::invalid_value(format!("{ENV_PREFIX}{name}"), value, e.to_string())
    })
}
