//! Match caching
//!
//! Matches that leave the active set, and matches loaded by a preload, are
//! parked here until their gc deadline so a later navigation can reuse their
//! data. Capacity is bounded with an LRU eviction policy.
//!
//! The cache also keeps a weak index of every match that is still alive
//! anywhere (active, pending, or held by an in-flight `load_route`), so two
//! concurrent requests for the same match id share one match and one loader
//! call.

use crate::logging::trace_log;
use crate::route_match::{MatchStatus, RouteMatch};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

/// A parked match and the clock time after which it may be dropped
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub gc: u64,
    pub route_match: Arc<RouteMatch>,
}

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Entries pushed out by the capacity bound
    pub evictions: usize,
    /// Entries dropped by gc sweeps
    pub collected: usize,
    pub invalidations: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Match cache with LRU eviction
///
/// Default capacity: 1000 entries.
#[derive(Debug)]
pub struct MatchCache {
    entries: LruCache<String, CacheEntry>,
    live: HashMap<String, Weak<RouteMatch>>,
    stats: CacheStats,
}

impl MatchCache {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            live: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Park a match until `gc`.
    pub fn insert(&mut self, route_match: Arc<RouteMatch>, gc: u64) {
        let id = route_match.match_id().to_string();
        trace_log!("caching match '{}' until {}", id, gc);
        self.claim(&route_match);
        if let Some((evicted_id, evicted)) = self.entries.push(id.clone(), CacheEntry { gc, route_match }) {
            if evicted_id != id {
                trace_log!("evicting cached match '{}'", evicted_id);
                self.stats.evictions += 1;
                self.retire(&evicted.route_match);
            }
        }
    }

    pub fn get(&mut self, match_id: &str) -> Option<Arc<RouteMatch>> {
        match self.entries.get(match_id) {
            Some(entry) => {
                self.stats.hits += 1;
                trace_log!("match cache hit for '{}'", match_id);
                Some(Arc::clone(&entry.route_match))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn entry(&self, match_id: &str) -> Option<&CacheEntry> {
        self.entries.peek(match_id)
    }

    pub fn contains(&self, match_id: &str) -> bool {
        self.entries.contains(match_id)
    }

    /// Take a match out of the cache; it stays in the live index.
    pub fn remove(&mut self, match_id: &str) -> Option<Arc<RouteMatch>> {
        self.entries.pop(match_id).map(|entry| entry.route_match)
    }

    /// Drop every entry whose gc deadline has passed, unless it is still
    /// loading. Returns the number of entries dropped.
    pub fn clean(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                let loading = entry.route_match.status() == MatchStatus::Loading
                    || entry.route_match.is_fetching();
                !loading && entry.gc <= now
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = self.entries.pop(id) {
                trace_log!("collecting cached match '{}'", id);
                self.retire(&entry.route_match);
            }
        }
        self.stats.collected += expired.len();
        self.live.retain(|_, weak| weak.strong_count() > 0);
        expired.len()
    }

    /// Register a match in the live index.
    pub(crate) fn claim(&mut self, route_match: &Arc<RouteMatch>) {
        self.live
            .insert(route_match.match_id().to_string(), Arc::downgrade(route_match));
    }

    /// A live match with this id, wherever it is held.
    pub(crate) fn live(&self, match_id: &str) -> Option<Arc<RouteMatch>> {
        self.live.get(match_id).and_then(Weak::upgrade)
    }

    /// Remove a match from the live index if it is the indexed one.
    pub(crate) fn retire(&mut self, route_match: &Arc<RouteMatch>) {
        let id = route_match.match_id();
        let indexed = self
            .live
            .get(id)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(route_match)));
        if indexed {
            self.live.remove(id);
        }
    }

    /// Every cached match, most recently used first.
    pub fn matches(&self) -> Vec<Arc<RouteMatch>> {
        self.entries
            .iter()
            .map(|(_, entry)| Arc::clone(&entry.route_match))
            .collect()
    }

    pub fn clear(&mut self) {
        trace_log!("clearing match cache");
        self.entries.clear();
        self.live.clear();
        self.stats.invalidations += 1;
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LoaderError;
    use crate::loader::{LoaderOptions, LoaderRegistry};
    use crate::params::RouteParams;
    use crate::route::RouteConfig;
    use crate::route_match::MatchEnv;
    use crate::tree::RouteTree;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        tree: RouteTree,
        env: Arc<MatchEnv>,
    }

    impl Fixture {
        fn new() -> Self {
            let tree = RouteTree::build(
                RouteConfig::root().child(RouteConfig::new("posts").loader(|_| async {
                    tokio::task::yield_now().await;
                    Ok::<_, LoaderError>(json!([1, 2]))
                })),
                1,
            )
            .unwrap();
            let clock = ManualClock::new(0);
            let env = Arc::new(MatchEnv {
                clock: Arc::new(clock.clone()),
                default_loader_max_age: Duration::ZERO,
                registry: Arc::new(LoaderRegistry::new(Arc::new(clock))),
            });
            Self { tree, env }
        }

        fn make(&self, match_id: &str) -> Arc<RouteMatch> {
            let route = self.tree.get("posts").unwrap();
            RouteMatch::new(
                route,
                match_id.to_string(),
                RouteParams::new(),
                "/posts".to_string(),
                "posts".to_string(),
                Arc::clone(&self.env),
            )
        }
    }

    #[test]
    fn test_cache_creation() {
        let cache = MatchCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 1000);
        assert_eq!(cache.stats(), &CacheStats::default());
        assert_eq!(MatchCache::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_hit_and_miss() {
        let fx = Fixture::new();
        let mut cache = MatchCache::new();

        assert!(cache.get("a").is_none());
        cache.insert(fx.make("a"), 100);
        assert_eq!(cache.get("a").unwrap().match_id(), "a");
        assert_eq!(cache.entry("a").unwrap().gc, 100);

        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_clean_drops_expired_entries() {
        let fx = Fixture::new();
        let mut cache = MatchCache::new();
        cache.insert(fx.make("a"), 100);
        cache.insert(fx.make("b"), 200);
        cache.insert(fx.make("c"), u64::MAX);

        assert_eq!(cache.clean(99), 0);
        assert_eq!(cache.clean(150), 1);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));

        assert_eq!(cache.clean(u64::MAX - 1), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().collected, 2);
    }

    #[tokio::test]
    async fn test_clean_keeps_loading_entries() {
        let fx = Fixture::new();
        let mut cache = MatchCache::new();
        let m = fx.make("a");
        let pending = m.load(&LoaderOptions::default());
        cache.insert(Arc::clone(&m), 0);

        assert_eq!(cache.clean(10), 0);
        pending.await;
        assert_eq!(cache.clean(10), 1);
    }

    #[test]
    fn test_lru_eviction_retires_match() {
        let fx = Fixture::new();
        let mut cache = MatchCache::with_capacity(2);
        let a = fx.make("a");
        cache.insert(Arc::clone(&a), 10);
        cache.insert(fx.make("b"), 10);
        cache.insert(fx.make("c"), 10);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.live("a").is_none());
    }

    #[test]
    fn test_live_index() {
        let fx = Fixture::new();
        let mut cache = MatchCache::new();
        let a = fx.make("a");
        cache.claim(&a);
        assert!(Arc::ptr_eq(&cache.live("a").unwrap(), &a));

        // a different match with the same id is not retired in its place
        let other = fx.make("a");
        cache.retire(&other);
        assert!(cache.live("a").is_some());

        cache.retire(&a);
        assert!(cache.live("a").is_none());

        let b = fx.make("b");
        cache.claim(&b);
        drop(b);
        assert!(cache.live("b").is_none());
        cache.clean(0);
        assert!(cache.live.is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let fx = Fixture::new();
        let mut cache = MatchCache::new();
        let a = fx.make("a");
        cache.insert(Arc::clone(&a), 10);

        assert!(Arc::ptr_eq(&cache.remove("a").unwrap(), &a));
        assert!(cache.is_empty());
        assert!(cache.live("a").is_some());

        cache.insert(Arc::clone(&a), 10);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.live("a").is_none());
        assert_eq!(cache.stats().invalidations, 1);
    }
}
