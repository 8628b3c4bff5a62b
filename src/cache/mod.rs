//! Result cache
//!
//! The dispatcher only depends on the [`ResultCache`] capability; the backing
//! store and its eviction behaviour are chosen from configuration:
//!
//! ```toml
//! [cache]
//! eviction_policy = "lru"  # none, lru, lfu, or ttl
//! max_entries = 1000       # 0 = unbounded
//! default_ttl = "1h"       # Used by the TTL policy
//! ```

mod memory;
mod policy;

pub use memory::MemoryCache;
pub use policy::{
    EvictionCandidate, EvictionPolicy, EvictionPolicyType, LfuPolicy, LruPolicy, TtlPolicy,
};

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::{parse_duration, CacheConfig};
use crate::key::ResultKey;
use crate::result::ExecutionResult;

/// Key to result store shared by every entity of a process.
///
/// Values are stored behind `Arc` and are never mutated once stored; a `put`
/// for an existing key replaces the entry.
pub trait ResultCache: Send + Sync {
    /// Look up a stored result
    fn get(&self, key: &ResultKey) -> Option<Arc<ExecutionResult>>;

    /// Store (insert or overwrite) a result
    fn put(&self, key: ResultKey, value: Arc<ExecutionResult>);

    /// Check whether a result is stored
    fn contains(&self, key: &ResultKey) -> bool;

    /// Usage counters
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Build the cache described by the configuration
pub fn create_cache(config: &CacheConfig) -> Result<Arc<dyn ResultCache>> {
    let policy_type: EvictionPolicyType = config.eviction_policy.parse()?;

    let cache = match policy_type {
        EvictionPolicyType::None => MemoryCache::unbounded(),
        EvictionPolicyType::Lru => {
            MemoryCache::with_policy(config.max_entries, Box::new(LruPolicy))
        }
        EvictionPolicyType::Lfu => {
            MemoryCache::with_policy(config.max_entries, Box::new(LfuPolicy))
        }
        EvictionPolicyType::Ttl => {
            let ttl = parse_duration(&config.default_ttl)?;
            MemoryCache::with_policy(config.max_entries, Box::new(TtlPolicy::new(ttl)))
        }
    };

    info!(
        policy = %policy_type,
        max_entries = config.max_entries,
        "Result cache initialized"
    );

    Ok(Arc::new(cache))
}
