//! LRU + TTL cache of hydrated search results.
//!
//! Entries are keyed by `SHA-256(project_id + ":" + normalized_query)`,
//! where normalization is trim + lowercase only. Filters are never part of
//! the key: the cache stores the full, unfiltered result set and callers
//! filter on the way out.
//!
//! # Eviction
//!
//! - **TTL**: an entry older than `ttl` is a miss and is removed on access.
//!   [`QueryCache::prune`] removes every expired entry in one pass.
//! - **Capacity**: inserting a new key into a full cache evicts the least
//!   recently used entry. Hits refresh recency.
//! - **Invalidation**: [`QueryCache::invalidate_project`] flushes every entry
//!   of a project. [`QueryCache::invalidate_entity`] does the same; there is
//!   no per-entity index.
//!
//! Recency is tracked by [`lru::LruCache`], so get, set and evict are O(1).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::HydratedSearchResult;

/// Default time-to-live for cached queries (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached queries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Source of "now" for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time via [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. For tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One cached query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCacheEntry {
    /// Normalized query text.
    pub query: String,
    pub project_id: String,
    /// Hydrated, unfiltered results.
    pub results: Vec<HydratedSearchResult>,
    /// Query embedding, kept for reuse.
    pub embedding: Option<Vec<f32>>,
    pub timestamp: Instant,
    pub hit_count: u64,
}

/// Observability counters. No behavioral effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_rate: f64,
    pub evictions: u64,
    pub size: usize,
    pub max_entries: usize,
}

/// Normalize a query for keying: trim and lowercase.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Derive the cache key for a query within a project.
pub fn cache_key(project_id: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b":");
    hasher.update(normalize_query(query).as_bytes());
    format!("{:x}", hasher.finalize())
}

struct State {
    entries: LruCache<String, QueryCacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl State {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn keys_where(&self, pred: impl Fn(&QueryCacheEntry) -> bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn remove_all(&mut self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|key| self.entries.pop(key.as_str()).is_some())
            .count()
    }
}

/// Thread-safe LRU + TTL cache of hydrated search results.
pub struct QueryCache {
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl QueryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            max_entries,
            clock,
            state: Mutex::new(State::new(max_entries)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &QueryCacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.timestamp) > self.ttl
    }

    /// Look up a query. A hit bumps `hit_count` and recency and returns a
    /// copy of the entry; an expired entry is removed and counts as a miss.
    pub fn get(&self, query: &str, project_id: &str) -> Option<QueryCacheEntry> {
        let key = cache_key(project_id, query);
        let now = self.clock.now();
        let mut state = self.lock();

        let expired = state.entries.peek(&key).map(|e| self.is_expired(e, now));
        if expired.is_none() {
            state.misses += 1;
            return None;
        }
        if expired == Some(true) {
            state.entries.pop(&key);
            state.misses += 1;
            tracing::debug!(project_id, "query cache entry expired");
            return None;
        }

        state.hits += 1;
        // `get_mut` also marks the entry most recently used.
        let entry = state.entries.get_mut(&key)?;
        entry.hit_count += 1;
        Some(entry.clone())
    }

    /// Cache the unfiltered results of a query.
    ///
    /// Re-setting an existing key replaces it and makes it most recent. A
    /// new key in a full cache evicts the least recently used entry first.
    pub fn set(
        &self,
        query: &str,
        project_id: &str,
        results: Vec<HydratedSearchResult>,
        embedding: Option<Vec<f32>>,
    ) {
        if self.max_entries == 0 {
            return;
        }

        let key = cache_key(project_id, query);
        let entry = QueryCacheEntry {
            query: normalize_query(query),
            project_id: project_id.to_string(),
            results,
            embedding,
            timestamp: self.clock.now(),
            hit_count: 0,
        };

        let mut state = self.lock();
        if let Some((evicted_key, evicted)) = state.entries.push(key.clone(), entry) {
            if evicted_key != key {
                state.evictions += 1;
                tracing::debug!(
                    project_id = evicted.project_id.as_str(),
                    "evicted least recently used query"
                );
            }
        }
    }

    /// Remove every entry belonging to `project_id`. Returns the count removed.
    pub fn invalidate_project(&self, project_id: &str) -> usize {
        let mut state = self.lock();
        let doomed = state.keys_where(|e| e.project_id == project_id);
        let removed = state.remove_all(&doomed);
        if removed > 0 {
            tracing::debug!(project_id, removed, "invalidated project queries");
        }
        removed
    }

    /// Invalidate queries that may reference `entity_id`.
    ///
    /// Flushes the whole project: entries do not track which entities they
    /// contain.
    pub fn invalidate_entity(&self, entity_id: &str, project_id: &str) -> usize {
        tracing::debug!(entity_id, project_id, "invalidating queries for entity");
        self.invalidate_project(project_id)
    }

    /// Remove all expired entries. Returns the count removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let expired = state.keys_where(|e| self.is_expired(e, now));
        state.remove_all(&expired)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            evictions: state.evictions,
            size: state.entries.len(),
            max_entries: self.max_entries,
        }
    }
}
