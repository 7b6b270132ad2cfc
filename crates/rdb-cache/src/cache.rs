//! The dependency cache.
//!
//! [`DependencyCache`] keeps one payload per string key together with its
//! creation time, plus a reverse adjacency map from a key to the keys that
//! were derived from it. Invalidating a key walks that map breadth-first and
//! drops everything reachable.
//!
//! # Invariants
//!
//! - Only successful producer results are ever stored.
//! - `invalidate(k)` removes `k` and every key transitively registered as a
//!   dependent of `k`, visiting each key at most once.
//! - A result fetched while an invalidation ran is returned to its caller but
//!   not stored, so a write that lands mid-fetch cannot be masked by stale data.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// A cached payload and the moment it was stored.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Returns `true` if the entry is younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

/// Counters for cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetch_failures: u64,
    pub invalidated: u64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Reverse adjacency: key -> keys that depend on it.
    dependents: HashMap<String, HashSet<String>>,
    /// Bumped by every invalidation; fetches that straddle a bump are not stored.
    generation: u64,
    stats: CacheStats,
}

impl<V> Default for CacheState<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            dependents: HashMap::new(),
            generation: 0,
            stats: CacheStats::default(),
        }
    }
}

/// TTL cache with cascading invalidation.
///
/// Built once per process and shared behind an `Arc`; it lives until the
/// process exits. There is no size bound and no eviction besides TTL expiry
/// and explicit invalidation. TTLs are chosen by the caller per lookup.
pub struct DependencyCache<V> {
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> DependencyCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached payload for `key` if it is younger than `ttl`,
    /// otherwise run `producer` and cache its result on success.
    ///
    /// `key` is registered as a dependent of every key in `depends_on`, so
    /// invalidating any of them also invalidates `key`. Producer errors are
    /// passed through and never cached; the next call runs the producer
    /// again.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        depends_on: &[&str],
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let generation = {
            let mut state = self.state();
            let hit = state
                .entries
                .get(key)
                .filter(|entry| entry.is_fresh(ttl))
                .map(|entry| entry.value.clone());
            if let Some(value) = hit {
                state.stats.hits += 1;
                return Ok(value);
            }
            state.stats.misses += 1;
            state.generation
        };

        debug!(key, "cache miss");
        let result = producer().await;

        let mut state = self.state();
        match result {
            Ok(value) => {
                if state.generation == generation {
                    Self::store(&mut state, key, value.clone(), depends_on);
                } else {
                    debug!(key, "invalidated during fetch; result not cached");
                }
                Ok(value)
            }
            Err(err) => {
                state.stats.fetch_failures += 1;
                Err(err)
            }
        }
    }

    /// The payload for `key` if it is younger than `ttl`.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        let state = self.state();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(ttl))
            .map(|entry| entry.value.clone())
    }

    /// Store a payload directly, e.g. to prime the cache after a write.
    pub fn insert(&self, key: &str, value: V, depends_on: &[&str]) {
        let mut state = self.state();
        Self::store(&mut state, key, value, depends_on);
    }

    fn store(state: &mut CacheState<V>, key: &str, value: V, depends_on: &[&str]) {
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
        for parent in depends_on {
            if *parent == key {
                continue;
            }
            state
                .dependents
                .entry((*parent).to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove `key` and every key transitively depending on it.
    ///
    /// Returns the visited keys in breadth-first order, starting with `key`.
    /// Keys are listed even if they held no entry at the time.
    pub fn invalidate(&self, key: &str) -> Vec<String> {
        let mut state = self.state();
        state.generation += 1;

        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(key.to_string());
        queue.push_back(key.to_string());

        while let Some(current) = queue.pop_front() {
            if state.entries.remove(&current).is_some() {
                state.stats.invalidated += 1;
            }
            if let Some(children) = state.dependents.remove(&current) {
                for child in children {
                    if visited.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }
            order.push(current);
        }

        debug!(key, cascade = order.len(), "cache invalidated");
        order
    }

    /// Keys directly registered as dependents of `key`, sorted.
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        let state = self.state();
        let mut keys: Vec<String> = state
            .dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Whether an entry exists for `key`, fresh or not.
    pub fn contains(&self, key: &str) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Drop every entry and dependency edge.
    pub fn clear(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.entries.clear();
        state.dependents.clear();
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }
}

impl<V: Clone> Default for DependencyCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for DependencyCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("DependencyCache")
            .field("entries", &state.entries.len())
            .field("edges", &state.dependents.values().map(HashSet::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    async fn fetch(cache: &DependencyCache<u32>, key: &str, deps: &[&str], value: u32) -> u32 {
        cache
            .get_or_fetch(key, TTL, deps, || async move { Ok::<_, String>(value) })
            .await
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Fetching and TTL
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn fresh_entry_skips_producer() {
        let cache = DependencyCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_fetch("Companies:all", TTL, &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let cache = DependencyCache::new();
        let ttl = Duration::from_millis(500);
        let first = cache
            .get_or_fetch("k", ttl, &[], || async { Ok::<_, String>(1) })
            .await
            .unwrap();
        assert_eq!(first, 1);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert_eq!(cache.get("k", ttl), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k", ttl), None);
        let second = cache
            .get_or_fetch("k", ttl, &[], || async { Ok::<_, String>(2) })
            .await
            .unwrap();
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn failures_are_never_cached() {
        let cache: DependencyCache<u32> = DependencyCache::new();
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_fetch("k", TTL, &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>("remote down".to_string())
            })
            .await
            .unwrap_err();
        assert_eq!(err, "remote down");
        assert!(!cache.contains("k"));

        let value = cache
            .get_or_fetch("k", TTL, &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(5)
            })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().fetch_failures, 1);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_is_not_masked() {
        let cache: DependencyCache<u32> = DependencyCache::new();
        let value = cache
            .get_or_fetch("k", TTL, &[], || async {
                cache.invalidate("k");
                Ok::<_, String>(1)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert!(!cache.contains("k"));
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn invalidate_cascades_to_dependents() {
        let cache = DependencyCache::new();
        fetch(&cache, "Companies:all", &[], 1).await;
        fetch(&cache, "Companies:name:acme", &["Companies:all"], 2).await;
        fetch(&cache, "Companies:search:x", &["Companies:name:acme"], 3).await;
        fetch(&cache, "Interactions:all", &[], 4).await;

        let removed = cache.invalidate("Companies:all");
        assert_eq!(removed[0], "Companies:all");
        assert_eq!(removed.len(), 3);
        assert!(!cache.contains("Companies:all"));
        assert!(!cache.contains("Companies:name:acme"));
        assert!(!cache.contains("Companies:search:x"));
        assert!(cache.contains("Interactions:all"));
        assert_eq!(cache.get("Interactions:all", TTL), Some(4));
    }

    #[tokio::test]
    async fn invalidate_dependent_leaves_parent() {
        let cache = DependencyCache::new();
        fetch(&cache, "p", &[], 1).await;
        fetch(&cache, "c", &["p"], 2).await;
        cache.invalidate("c");
        assert!(cache.contains("p"));
        assert!(!cache.contains("c"));
    }

    #[test]
    fn cycles_terminate() {
        let cache = DependencyCache::new();
        cache.insert("a", 1, &["b"]);
        cache.insert("b", 2, &["a"]);
        cache.insert("c", 3, &["b"]);
        let removed = cache.invalidate("a");
        assert_eq!(removed.len(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn diamond_visits_each_key_once() {
        let cache = DependencyCache::new();
        cache.insert("root", 0, &[]);
        cache.insert("left", 1, &["root"]);
        cache.insert("right", 2, &["root"]);
        cache.insert("leaf", 3, &["left", "right"]);
        let removed = cache.invalidate("root");
        assert_eq!(removed.len(), 4);
        assert_eq!(removed.iter().filter(|k| *k == "leaf").count(), 1);
        assert_eq!(cache.stats().invalidated, 4);
    }

    #[test]
    fn invalidate_unknown_key_is_harmless() {
        let cache: DependencyCache<u32> = DependencyCache::new();
        cache.insert("x", 1, &[]);
        assert_eq!(cache.invalidate("nope"), vec!["nope".to_string()]);
        assert!(cache.contains("x"));
    }

    #[test]
    fn edges_are_dropped_with_the_parent() {
        let cache = DependencyCache::new();
        cache.insert("p", 1, &[]);
        cache.insert("c", 2, &["p"]);
        assert_eq!(cache.dependents_of("p"), vec!["c".to_string()]);
        cache.invalidate("p");
        assert!(cache.dependents_of("p").is_empty());
    }

    #[test]
    fn self_dependency_is_ignored() {
        let cache = DependencyCache::new();
        cache.insert("k", 1, &["k"]);
        assert!(cache.dependents_of("k").is_empty());
    }

    #[test]
    fn clear_empties_everything() {
        let cache = DependencyCache::new();
        cache.insert("p", 1, &[]);
        cache.insert("c", 2, &["p"]);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.dependents_of("p").is_empty());
    }

    // -----------------------------------------------------------------------
    // Property: invalidation removes exactly the reachable set
    // -----------------------------------------------------------------------

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Edges go from a lower-numbered key to a higher-numbered dependent.
        fn graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, usize)> {
            (2usize..12).prop_flat_map(|n| {
                let edges = proptest::collection::vec((0..n, 0..n), 0..(n * 2))
                    .prop_map(|pairs| {
                        pairs
                            .into_iter()
                            .filter(|(a, b)| a < b)
                            .collect::<Vec<_>>()
                    });
                (Just(n), edges, 0..n)
            })
        }

        fn reachable(n: usize, edges: &[(usize, usize)], start: usize) -> HashSet<usize> {
            let mut seen = HashSet::new();
            let mut queue = VecDeque::from([start]);
            seen.insert(start);
            while let Some(node) = queue.pop_front() {
                for (parent, child) in edges {
                    if *parent == node && *child < n && seen.insert(*child) {
                        queue.push_back(*child);
                    }
                }
            }
            seen
        }

        proptest! {
            #[test]
            fn invalidate_removes_exactly_reachable_keys((n, edges, start) in graph()) {
                let cache = DependencyCache::new();
                let key = |i: usize| format!("k{i}");
                for i in 0..n {
                    let parents: Vec<String> = edges
                        .iter()
                        .filter(|(_, child)| *child == i)
                        .map(|(parent, _)| key(*parent))
                        .collect();
                    let refs: Vec<&str> = parents.iter().map(String::as_str).collect();
                    cache.insert(&key(i), i, &refs);
                }

                cache.invalidate(&key(start));
                let expected = reachable(n, &edges, start);
                for i in 0..n {
                    prop_assert_eq!(cache.contains(&key(i)), !expected.contains(&i));
                }
            }
        }
    }
}
