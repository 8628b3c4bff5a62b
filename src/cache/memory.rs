use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::policy::{EvictionCandidate, EvictionPolicy, LruPolicy};
use super::{CacheStats, ResultCache};
use crate::key::ResultKey;
use crate::logging::{operations, services};
use crate::result::ExecutionResult;

/// Fraction of `max_entries` the cache shrinks to once it overflows
const TARGET_RATIO: f64 = 0.9;

struct CachedEntry {
    value: Arc<ExecutionResult>,
    created_at: Instant,
    accessed_tick: AtomicU64,
    access_count: AtomicU64,
}

impl CachedEntry {
    fn touch(&self, tick: u64) {
        self.accessed_tick.store(tick, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-process result cache
///
/// Backed by a sharded concurrent map: a lookup of one key never waits on a
/// store of another. Bounded caches evict through an [`EvictionPolicy`] once
/// they hold more than `max_entries` results.
pub struct MemoryCache {
    entries: DashMap<ResultKey, CachedEntry>,
    policy: Box<dyn EvictionPolicy>,
    /// 0 = unbounded
    max_entries: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    /// Unbounded cache that never evicts
    pub fn unbounded() -> Self {
        Self::with_policy(0, Box::new(LruPolicy))
    }

    pub fn with_policy(max_entries: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            max_entries,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Shrink to the target size. `keep` (the entry just stored) is never a candidate.
    fn evict(&self, keep: &ResultKey) {
        let target = ((self.max_entries as f64 * TARGET_RATIO) as usize).max(1);

        let (expired, mut live): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| EvictionCandidate {
                key: entry.key().clone(),
                accessed_tick: entry.accessed_tick.load(Ordering::Relaxed),
                access_count: entry.access_count.load(Ordering::Relaxed),
                age: entry.created_at.elapsed(),
            })
            .partition(|c| self.policy.is_expired(c.age));

        let mut evicted = 0u64;
        for candidate in expired {
            if self.entries.remove(&candidate.key).is_some() {
                evicted += 1;
            }
        }

        if self.entries.len() > target {
            self.policy.sort_candidates(&mut live);
            for candidate in live {
                if self.entries.len() <= target {
                    break;
                }
                if self.entries.remove(&candidate.key).is_some() {
                    evicted += 1;
                }
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(
            service = services::RESULT_CACHE,
            operation = operations::EVICT,
            entry_count = self.entries.len(),
            evicted,
            policy = ?self.policy,
            "eviction run"
        );
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &ResultKey) -> Option<Arc<ExecutionResult>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !self.policy.is_expired(entry.created_at.elapsed()) => {
                entry.touch(self.tick());
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.value));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // Only drop the entry if no fresh value replaced it in the meantime
            if self
                .entries
                .remove_if(key, |_, e| self.policy.is_expired(e.created_at.elapsed()))
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: ResultKey, value: Arc<ExecutionResult>) {
        let entry = CachedEntry {
            value,
            created_at: Instant::now(),
            accessed_tick: AtomicU64::new(self.tick()),
            access_count: AtomicU64::new(0),
        };
        self.entries.insert(key.clone(), entry);

        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            self.evict(&key);
        }
    }

    fn contains(&self, key: &ResultKey) -> bool {
        self.entries
            .get(key)
            .map(|e| !self.policy.is_expired(e.created_at.elapsed()))
            .unwrap_or(false)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
