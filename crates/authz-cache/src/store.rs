//! Bounded TTL store for authorization decisions
//!
//! Entries live until their TTL passes, an invalidation removes them, or the
//! store is full and they are the oldest insertion. Reads never extend an
//! entry's life: eviction is FIFO by insertion time, not LRU.
//!
//! Every entry is also filed under its application in an app index so a
//! policy change for one application drops only that application's entries.
//!
//! One coarse mutex guards the map, both indexes and the counters.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::key::CacheKey;
use crate::request::{AppId, AuthorizationRequest};

/// Default lifetime of a cached decision
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default maximum number of cached decisions
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// A cached allow/deny decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Whether the check was permitted
    pub allowed: bool,
    /// Reasons reported by the provider, in order
    pub reasons: Vec<String>,
    /// When the entry was inserted
    pub created_at: Instant,
    /// How long the entry stays valid
    pub ttl: Duration,
}

impl CacheEntry {
    /// Instant after which the entry is stale
    ///
    /// `None` when `created_at + ttl` is past the clock's range; such an
    /// entry never expires.
    pub fn expires_at(&self) -> Option<Instant> {
        self.created_at.checked_add(self.ttl)
    }

    /// `now > created_at + ttl`
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|deadline| now > deadline)
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Invalidation calls, scoped or full
    pub invalidations: u64,
    /// Entries currently held
    pub size: usize,
    /// `hits / max(1, hits + misses)`
    pub hit_rate: f64,
}

#[derive(Debug)]
struct StoredEntry {
    entry: CacheEntry,
    app_id: AppId,
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, StoredEntry>,
    app_index: HashMap<AppId, HashSet<CacheKey>>,
    /// Insertion order; the first element is the eviction candidate
    order: BTreeMap<(Instant, u64), CacheKey>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    invalidations: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &CacheKey) -> Option<StoredEntry> {
        let stored = self.entries.remove(key)?;
        self.order.remove(&(stored.entry.created_at, stored.seq));
        if let Some(bucket) = self.app_index.get_mut(&stored.app_id) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.app_index.remove(&stored.app_id);
            }
        }
        Some(stored)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, stored)| stored.entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let key = self.order.first_key_value().map(|(_, key)| *key)?;
        self.remove(&key);
        Some(key)
    }
}

/// Thread-safe decision cache with scoped invalidation
#[derive(Debug)]
pub struct DecisionCache {
    inner: Mutex<CacheInner>,
    default_ttl: Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl DecisionCache {
    /// Create a cache using the system clock
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self::with_clock(default_ttl, max_size, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(default_ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            default_ttl,
            max_size: max_size.max(1),
            clock,
        }
    }

    /// Lifetime applied when `set` is called without a TTL
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Capacity bound
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up the decision for `request`
    ///
    /// An expired entry is removed as a side effect and reported as a miss.
    pub fn get(&self, request: &AuthorizationRequest) -> Option<CacheEntry> {
        let key = CacheKey::derive(request);
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(&key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(stored) => stored.entry.is_expired(now),
        };

        if expired {
            inner.remove(&key);
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.entries.get(&key).map(|stored| stored.entry.clone())
    }

    /// Store a decision, evicting if the cache is full
    ///
    /// A `ttl` of `None` or zero uses the cache's default lifetime.
    pub fn set(
        &self,
        request: &AuthorizationRequest,
        allowed: bool,
        reasons: Vec<String>,
        ttl: Option<Duration>,
    ) {
        let key = CacheKey::derive(request);
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        // Replacing an existing key does not grow the store.
        if inner.remove(&key).is_none() && inner.entries.len() >= self.max_size {
            let purged = inner.purge_expired(now);
            if purged > 0 {
                tracing::debug!(purged, "Purged expired decisions at capacity");
            }
            if inner.entries.len() >= self.max_size {
                if let Some(evicted) = inner.evict_oldest() {
                    tracing::debug!(key = %evicted, "Evicted oldest decision");
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = CacheEntry {
            allowed,
            reasons,
            created_at: now,
            ttl: ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(self.default_ttl),
        };
        inner.order.insert((now, seq), key);
        inner
            .app_index
            .entry(request.app_id)
            .or_default()
            .insert(key);
        inner.entries.insert(
            key,
            StoredEntry {
                entry,
                app_id: request.app_id,
                seq,
            },
        );
    }

    /// Drop every entry cached for `app_id`; returns how many were removed
    pub fn invalidate_app(&self, app_id: AppId) -> usize {
        let mut inner = self.inner.lock();
        let keys = inner.app_index.remove(&app_id).unwrap_or_default();
        let mut removed = 0;
        for key in &keys {
            if inner.remove(key).is_some() {
                removed += 1;
            }
        }
        inner.invalidations += 1;
        removed
    }

    /// Drop every entry; returns the prior size
    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.app_index.clear();
        inner.order.clear();
        inner.invalidations += 1;
        count
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            invalidations: inner.invalidations,
            size: inner.entries.len(),
            hit_rate: inner.hits as f64 / lookups.max(1) as f64,
        }
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::request::EntityRef;

    fn request(app_id: AppId, resource: &str) -> AuthorizationRequest {
        AuthorizationRequest::new(
            app_id,
            EntityRef::new("User", "alice"),
            "view",
            EntityRef::new("Document", resource),
        )
    }

    fn cache_with_clock(max_size: usize) -> (DecisionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = DecisionCache::with_clock(Duration::from_secs(60), max_size, clock.clone());
        (cache, clock)
    }

    #[test]
    fn set_then_get_is_a_hit() {
        let (cache, _) = cache_with_clock(10);
        let req = request(1, "doc1");
        cache.set(&req, true, vec!["policy0".into()], None);

        let entry = cache.get(&req).expect("cached");
        assert!(entry.allowed);
        assert_eq!(entry.reasons, vec!["policy0".to_string()]);
        assert_eq!(entry.ttl, Duration::from_secs(60));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 0));
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn unknown_key_is_a_miss() {
        let (cache, _) = cache_with_clock(10);
        assert!(cache.get(&request(1, "doc1")).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (0, 1, 0));
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn entry_is_live_until_ttl_passes() {
        let (cache, clock) = cache_with_clock(10);
        let req = request(1, "doc1");
        cache.set(&req, true, Vec::new(), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_millis(999));
        assert!(cache.get(&req).is_some());

        // Exactly at created_at + ttl the entry is still live.
        clock.advance(Duration::from_millis(1));
        assert!(cache.get(&req).is_some());

        clock.advance(Duration::from_millis(100));
        assert!(cache.get(&req).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (2, 1, 0));
    }

    #[test]
    fn hits_do_not_extend_lifetime() {
        let (cache, clock) = cache_with_clock(10);
        let req = request(1, "doc1");
        cache.set(&req, false, Vec::new(), Some(Duration::from_secs(10)));

        for _ in 0..5 {
            clock.advance(Duration::from_secs(2));
            assert!(cache.get(&req).is_some());
        }
        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&req).is_none());
    }

    #[test]
    fn full_cache_evicts_oldest_insertion() {
        let (cache, clock) = cache_with_clock(2);
        let (k1, k2, k3) = (request(1, "k1"), request(1, "k2"), request(1, "k3"));

        cache.set(&k1, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));
        cache.set(&k2, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));

        // Reading k1 must not protect it: eviction is by insertion time.
        assert!(cache.get(&k1).is_some());
        cache.set(&k3, true, Vec::new(), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
    }

    #[test]
    fn expired_entries_are_purged_before_evicting_live_ones() {
        let (cache, clock) = cache_with_clock(2);
        let (short, long, fresh) = (request(1, "short"), request(1, "long"), request(1, "fresh"));

        cache.set(&short, true, Vec::new(), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_millis(10));
        cache.set(&long, true, Vec::new(), Some(Duration::from_secs(60)));
        clock.advance(Duration::from_secs(2));
        cache.set(&fresh, true, Vec::new(), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&long).is_some());
        assert!(cache.get(&fresh).is_some());
    }

    #[test]
    fn identical_timestamps_evict_in_insertion_order() {
        let (cache, _) = cache_with_clock(3);
        let reqs: Vec<_> = (0..5).map(|i| request(1, &format!("doc{i}"))).collect();
        for req in &reqs {
            cache.set(req, true, Vec::new(), None);
            assert!(cache.len() <= 3);
        }
        assert!(cache.get(&reqs[0]).is_none());
        assert!(cache.get(&reqs[1]).is_none());
        for req in &reqs[2..] {
            assert!(cache.get(req).is_some());
        }
    }

    #[test]
    fn overwriting_a_key_never_evicts() {
        let (cache, clock) = cache_with_clock(2);
        let (a, b) = (request(1, "a"), request(1, "b"));
        cache.set(&a, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));
        cache.set(&b, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));
        cache.set(&b, false, vec!["changed".into()], None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        let updated = cache.get(&b).expect("still cached");
        assert!(!updated.allowed);
        assert_eq!(updated.reasons, vec!["changed".to_string()]);
    }

    #[test]
    fn overwritten_key_moves_to_back_of_eviction_order() {
        let (cache, clock) = cache_with_clock(2);
        let (a, b, c) = (request(1, "a"), request(1, "b"), request(1, "c"));
        cache.set(&a, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));
        cache.set(&b, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));
        cache.set(&a, true, Vec::new(), None);
        clock.advance(Duration::from_secs(1));
        cache.set(&c, true, Vec::new(), None);

        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn invalidate_app_is_scoped() {
        let (cache, _) = cache_with_clock(10);
        let app1 = [request(1, "a"), request(1, "b")];
        let app2 = request(2, "a");
        for req in &app1 {
            cache.set(req, true, Vec::new(), None);
        }
        cache.set(&app2, true, Vec::new(), None);

        assert_eq!(cache.invalidate_app(1), 2);
        assert!(cache.get(&app1[0]).is_none());
        assert!(cache.get(&app1[1]).is_none());
        assert!(cache.get(&app2).is_some());

        let stats = cache.stats();
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn invalidating_unknown_app_counts_but_removes_nothing() {
        let (cache, _) = cache_with_clock(10);
        cache.set(&request(1, "a"), true, Vec::new(), None);
        assert_eq!(cache.invalidate_app(42), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn expired_removal_keeps_app_index_consistent() {
        let (cache, clock) = cache_with_clock(10);
        let req = request(1, "a");
        cache.set(&req, true, Vec::new(), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));
        assert!(cache.get(&req).is_none());
        assert_eq!(cache.invalidate_app(1), 0);
    }

    #[test]
    fn invalidate_all_returns_prior_size() {
        let (cache, _) = cache_with_clock(10);
        cache.set(&request(1, "a"), true, Vec::new(), None);
        cache.set(&request(2, "a"), false, Vec::new(), None);

        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_app(1), 0);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        let (cache, clock) = cache_with_clock(10);
        let req = request(1, "doc1");
        cache.set(&req, true, Vec::new(), Some(Duration::ZERO));

        clock.advance(Duration::from_secs(30));
        let entry = cache.get(&req).expect("default ttl applies");
        assert_eq!(entry.ttl, Duration::from_secs(60));
    }

    #[test]
    fn unrepresentable_deadline_never_expires() {
        let (cache, clock) = cache_with_clock(10);
        let req = request(1, "doc1");
        cache.set(&req, true, Vec::new(), Some(Duration::MAX));

        clock.advance(Duration::from_secs(86_400 * 365));
        let entry = cache.get(&req).expect("still cached");
        assert_eq!(entry.expires_at(), None);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn huge_default_ttl_does_not_panic() {
        let cache = DecisionCache::new(Duration::MAX, 10);
        let req = request(1, "doc1");
        cache.set(&req, true, Vec::new(), None);
        assert!(cache.get(&req).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_principals_never_share_an_entry() {
        let (cache, _) = cache_with_clock(10);
        let mut alice = request(1, "doc1");
        alice.principal = EntityRef::new("User", "a::b");
        let mut other = request(1, "doc1");
        other.principal = EntityRef::new("User::a", "b");

        cache.set(&alice, true, Vec::new(), None);
        assert!(cache.get(&other).is_none());
        assert!(cache.get(&alice).is_some());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = DecisionCache::new(DEFAULT_TTL, 0);
        assert_eq!(cache.max_size(), 1);
        cache.set(&request(1, "a"), true, Vec::new(), None);
        cache.set(&request(1, "b"), true, Vec::new(), None);
        assert_eq!(cache.len(), 1);
    }
}
