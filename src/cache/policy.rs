//! Eviction policy implementations
//!
//! Each policy defines how candidates are ordered for eviction:
//! - **LRU**: Sort by last access tick (oldest first)
//! - **LFU**: Sort by `access_count` (lowest first), ties broken by recency
//! - **TTL**: Entries older than the TTL expire; live entries fall back to LRU
//!
//! `none` keeps every entry (unbounded cache).

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::key::ResultKey;

/// Candidate for eviction with all metadata needed for policy decisions
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: ResultKey,
    /// Logical clock value of the last access (higher = more recent)
    pub accessed_tick: u64,
    /// Total access count
    pub access_count: u64,
    /// Time since the entry was stored
    pub age: Duration,
}

/// Trait for eviction policy implementations
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Sort candidates by eviction priority (first = most likely to evict)
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]);

    /// Whether an entry of this age is no longer served.
    /// Default: entries never expire
    fn is_expired(&self, _age: Duration) -> bool {
        false
    }
}

/// LRU (Least Recently Used) eviction policy
#[derive(Debug, Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by(|a, b| a.accessed_tick.cmp(&b.accessed_tick));
    }
}

/// LFU (Least Frequently Used) eviction policy
#[derive(Debug, Default)]
pub struct LfuPolicy;

impl EvictionPolicy for LfuPolicy {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]) {
        // Tie-breaker: least recently used first
        candidates.sort_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then_with(|| a.accessed_tick.cmp(&b.accessed_tick))
        });
    }
}

/// TTL (Time To Live) eviction policy
///
/// Expired entries are misses and are dropped first; when the cache is still
/// over capacity the remaining entries are evicted in LRU order.
#[derive(Debug)]
pub struct TtlPolicy {
    ttl: Duration,
}

impl TtlPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl EvictionPolicy for TtlPolicy {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]) {
        LruPolicy.sort_candidates(candidates);
    }

    fn is_expired(&self, age: Duration) -> bool {
        age > self.ttl
    }
}

/// Eviction policy type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicyType {
    None,
    Lru,
    Lfu,
    Ttl,
}

impl FromStr for EvictionPolicyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "ttl" => Ok(Self::Ttl),
            other => Err(anyhow!(
                "Invalid eviction policy: {}. Use: none, lru, lfu, ttl",
                other
            )),
        }
    }
}

impl fmt::Display for EvictionPolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Ttl => "ttl",
        };
        f.write_str(name)
    }
}
