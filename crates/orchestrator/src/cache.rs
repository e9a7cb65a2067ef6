//! Response caching
//!
//! Key derivation shared by every cache backend, plus a bounded in-memory
//! [`ResponseCache`] with per-entry TTL and tag invalidation.

use anyhow::Result;
use async_trait::async_trait;
use athenaeum_core::{CacheSetOptions, RequestContext, Response, ResponseCache};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Entries kept before the oldest are evicted
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// How often a `set` sweeps out expired entries
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn digest(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Fingerprint of the caller identity a response may depend on.
///
/// Teams and roles are sorted first so their order does not matter.
pub fn user_fingerprint(context: &RequestContext) -> String {
    let mut teams: Vec<&str> = context.teams.iter().map(String::as_str).collect();
    let mut roles: Vec<&str> = context.roles.iter().map(String::as_str).collect();
    teams.sort_unstable();
    roles.sort_unstable();

    digest(&format!(
        "user={}\nteams={}\nroles={}",
        context.user_id.as_deref().unwrap_or(""),
        teams.join(","),
        roles.join(",")
    ))
}

/// Cache key for one (librarian, query, caller) combination
pub fn cache_key(librarian_id: &str, query: &str, context: &RequestContext) -> String {
    format!(
        "librarian:{}:{}:{}",
        librarian_id,
        digest(query),
        user_fingerprint(context)
    )
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Response,
    stored_at: Instant,
    expires_at: Option<Instant>,
    tags: Vec<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// DashMap-backed cache bounded by entry count.
///
/// Expired entries are dropped on read and swept periodically on write. Once
/// full, a new key first purges expired entries and then evicts the oldest
/// down to nine tenths of capacity.
#[derive(Debug)]
pub struct InMemoryResponseCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Option<Duration>,
    max_entries: usize,
    purge_interval: Duration,
    last_purge: Mutex<Instant>,
}

impl Default for InMemoryResponseCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            last_purge: Mutex::new(Instant::now()),
        }
    }
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL applied when a `set` carries none
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Remove every entry stored with `tag`, returning how many were dropped
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.tags.iter().any(|t| t == tag))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        debug!(tag, removed, "Invalidated cache tag");
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        *self.last_purge.lock() = now;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_purge(&self, now: Instant) {
        let due = now.saturating_duration_since(*self.last_purge.lock()) >= self.purge_interval;
        if due {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, "Purged expired cache entries");
            }
        }
    }

    /// Make room for one new key
    fn maybe_evict(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.purge_expired();
        if self.entries.len() < self.max_entries {
            return;
        }

        let target = (self.max_entries * 9 / 10).min(self.max_entries - 1);
        let mut by_age: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.stored_at, entry.key().clone()))
            .collect();
        by_age.sort_unstable();

        let excess = self.entries.len().saturating_sub(target);
        let evicted = by_age
            .into_iter()
            .take(excess)
            .filter(|(_, key)| self.entries.remove(key).is_some())
            .count();
        info!(
            evicted,
            remaining = self.entries.len(),
            max_entries = self.max_entries,
            "Evicted oldest cache entries"
        );
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str) -> Result<Option<Response>> {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Response, options: CacheSetOptions) -> Result<()> {
        let now = Instant::now();
        self.maybe_purge(now);
        if !self.entries.contains_key(key) {
            self.maybe_evict();
        }

        let expires_at = options.ttl.or(self.default_ttl).map(|ttl| now + ttl);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                expires_at,
                tags: options.tags,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(ttl_ms: Option<u64>, tags: &[&str]) -> CacheSetOptions {
        CacheSetOptions {
            ttl: ttl_ms.map(Duration::from_millis),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_team_and_role_order() {
        let a = RequestContext::new()
            .with_user("ada")
            .with_teams(vec!["infra".into(), "docs".into()])
            .with_roles(vec!["admin".into(), "dev".into()]);
        let b = RequestContext::new()
            .with_user("ada")
            .with_teams(vec!["docs".into(), "infra".into()])
            .with_roles(vec!["dev".into(), "admin".into()]);

        assert_eq!(user_fingerprint(&a), user_fingerprint(&b));
        assert_eq!(user_fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_key_depends_on_librarian_query_and_user() {
        let ada = RequestContext::new().with_user("ada");
        let bob = RequestContext::new().with_user("bob");

        let key = cache_key("docs", "what is a pod", &ada);
        assert!(key.starts_with("librarian:docs:"));
        assert_ne!(key, cache_key("search", "what is a pod", &ada));
        assert_ne!(key, cache_key("docs", "what is a node", &ada));
        assert_ne!(key, cache_key("docs", "what is a pod", &bob));
        assert_eq!(key, cache_key("docs", "what is a pod", &ada.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryResponseCache::new();
        cache
            .set("k", Response::answer("cached"), tagged(Some(100), &[]))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies_without_explicit_ttl() {
        let cache = InMemoryResponseCache::new().with_default_ttl(Duration::from_millis(50));
        cache
            .set("k", Response::answer("cached"), tagged(None, &[]))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(cache.purge_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filling_past_capacity_evicts_oldest() {
        let cache = InMemoryResponseCache::new().with_max_entries(10);
        for i in 0..25 {
            cache
                .set(&format!("k{i}"), Response::answer(i.to_string()), tagged(None, &[]))
                .await
                .unwrap();
            assert!(cache.len() <= 10, "len {} after k{i}", cache.len());
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        assert_eq!(cache.len(), 10);
        assert!(cache.get("k0").await.unwrap().is_none());
        assert!(cache.get("k14").await.unwrap().is_none());
        assert!(cache.get("k15").await.unwrap().is_some());
        assert_eq!(
            cache.get("k24").await.unwrap().and_then(|r| r.answer),
            Some("24".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_drops_expired_before_oldest() {
        let cache = InMemoryResponseCache::new().with_max_entries(3);
        cache
            .set("short", Response::answer("1"), tagged(Some(10), &[]))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("a", Response::answer("2"), tagged(None, &[])).await.unwrap();
        cache.set("b", Response::answer("3"), tagged(None, &[])).await.unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        cache.set("c", Response::answer("4"), tagged(None, &[])).await.unwrap();

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("short").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_entries_periodically() {
        let cache = InMemoryResponseCache::new();
        for i in 0..500 {
            cache
                .set(&format!("k{i}"), Response::answer("short"), tagged(Some(10), &[]))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 500);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache
            .set("fresh", Response::answer("new"), tagged(None, &[]))
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_tag_removes_only_tagged_entries() {
        let cache = InMemoryResponseCache::new();
        cache
            .set("a", Response::answer("1"), tagged(None, &["librarian:docs"]))
            .await
            .unwrap();
        cache
            .set("b", Response::answer("2"), tagged(None, &["librarian:docs", "team:infra"]))
            .await
            .unwrap();
        cache
            .set("c", Response::answer("3"), tagged(None, &["librarian:search"]))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_tag("librarian:docs"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("c").await.unwrap().and_then(|r| r.answer),
            Some("3".to_string())
        );
    }
}
