//! Per-librarian circuit breaker store

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use athenaeum_core::{CircuitBreakerConfig, EventBus};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Owns one [`CircuitBreaker`] per librarian id.
///
/// Breakers are created lazily on first use and live as long as the manager.
/// The configuration given on first creation wins; later lookups with a
/// different configuration get the existing breaker.
#[derive(Debug, Default)]
pub struct BreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    events: Option<Arc<EventBus>>,
}

impl BreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn get_breaker(
        &self,
        librarian_id: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(librarian_id) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .breakers
            .entry(librarian_id.to_string())
            .or_insert_with(|| {
                let config = config.cloned().unwrap_or_else(|| self.default_config.clone());
                debug!(librarian_id, "Creating circuit breaker");
                let breaker = CircuitBreaker::new(librarian_id, config);
                Arc::new(match &self.events {
                    Some(events) => breaker.with_events(Arc::clone(events)),
                    None => breaker,
                })
            });
        Arc::clone(entry.value())
    }

    pub fn get(&self, librarian_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(librarian_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every breaker, sorted by librarian id
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athenaeum_core::CircuitState;

    #[test]
    fn test_breakers_are_created_once_per_id() {
        let manager = BreakerManager::default();
        let first = manager.get_breaker("docs", None);
        let second = manager.get_breaker("docs", None);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.len(), 1);
        assert!(manager.get("search").is_none());
    }

    #[test]
    fn test_first_config_wins() {
        let manager = BreakerManager::default();
        let custom = CircuitBreakerConfig {
            volume_threshold: 2,
            ..Default::default()
        };

        manager.get_breaker("docs", Some(&custom));
        let later = manager.get_breaker("docs", None);

        assert_eq!(later.config().volume_threshold, 2);
    }

    #[test]
    fn test_reset_all_closes_every_breaker() {
        let manager = BreakerManager::new(CircuitBreakerConfig {
            volume_threshold: 1,
            ..Default::default()
        });
        manager.get_breaker("a", None).record_failure();
        manager.get_breaker("b", None).record_failure();
        assert!(manager
            .stats()
            .iter()
            .all(|stats| stats.state == CircuitState::Open));

        manager.reset_all();

        let stats = manager.stats();
        assert_eq!(
            stats.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(stats.iter().all(|s| s.state == CircuitState::Closed));
    }
}
