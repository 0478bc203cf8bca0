use async_trait::async_trait;
use std::time::Duration;

/// A cached permission decision plus the dependency chain it was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedDecision {
    /// Whether the permission was granted.
    pub granted: bool,
    /// Canonical permission keys the decision depended on.
    pub dependencies: Vec<String>,
}

/// Operational cache counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries across all tiers.
    pub size: usize,
    /// Lookup hits.
    pub hits: u64,
    /// Lookup misses.
    pub misses: u64,
    /// Entries dropped by TTL or capacity eviction.
    pub evictions: u64,
    /// Approximate heap usage of live entries.
    pub approx_bytes: usize,
}

impl CacheStats {
    /// Hit rate over all lookups, 0.0 when no lookups happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Decision cache interface with dependency-tagged invalidation.
///
/// Every `set` registers the key under each of its tags; invalidating a
/// tag evicts every key registered under it. This is how role and
/// permission changes propagate to already-cached decisions.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    /// Gets a cached decision.
    async fn get(&self, key: &str) -> Option<CachedDecision>;

    /// Stores a decision under the given dependency tags.
    ///
    /// A `None` ttl uses the cache's own default.
    async fn set(
        &self,
        key: String,
        value: CachedDecision,
        ttl: Option<Duration>,
        tags: Vec<String>,
    );

    /// Deletes a single key.
    async fn delete(&self, key: &str);

    /// Evicts every key registered under the tag; returns the eviction count.
    async fn invalidate_tag(&self, tag: &str) -> usize;

    /// Drops all entries and tags.
    async fn clear(&self);

    /// Returns current counters.
    fn stats(&self) -> CacheStats;

    /// Whether the cache is near its memory budget and warming should back off.
    fn under_pressure(&self) -> bool {
        false
    }
}

/// No-op cache implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl DecisionCache for NoCache {
    async fn get(&self, _key: &str) -> Option<CachedDecision> {
        None
    }

    async fn set(
        &self,
        _key: String,
        _value: CachedDecision,
        _ttl: Option<Duration>,
        _tags: Vec<String>,
    ) {
    }

    async fn delete(&self, _key: &str) {}

    async fn invalidate_tag(&self, _tag: &str) -> usize {
        0
    }

    async fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
