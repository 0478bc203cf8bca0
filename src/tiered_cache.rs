use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::{CacheStats, CachedDecision, DecisionCache};

const HOT: usize = 0;
const WARM: usize = 1;
const COLD: usize = 2;
const TIER_COUNT: usize = 3;

// Fixed per-entry overhead added to the measured key/value bytes.
const ENTRY_OVERHEAD: usize = 64;

/// Size and lifetime limits for one tier.
#[derive(Clone, Debug)]
pub struct TierConfig {
    /// Maximum entry count.
    pub capacity: usize,
    /// Maximum approximate bytes.
    pub max_bytes: usize,
    /// Default time-to-live for entries landing in this tier.
    pub ttl: Duration,
}

/// Configuration for [`TieredCache`].
#[derive(Clone, Debug)]
pub struct TieredConfig {
    /// Hot tier: small, short-lived, first lookup target.
    pub hot: TierConfig,
    /// Warm tier: holds entries demoted from hot.
    pub warm: TierConfig,
    /// Cold tier: large, long-lived last stop before discard.
    pub cold: TierConfig,
    /// Fraction of the total byte budget above which the cache reports
    /// memory pressure.
    pub pressure_threshold: f64,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            hot: TierConfig {
                capacity: 1_024,
                max_bytes: 1 << 20,
                ttl: Duration::from_secs(60),
            },
            warm: TierConfig {
                capacity: 4_096,
                max_bytes: 4 << 20,
                ttl: Duration::from_secs(300),
            },
            cold: TierConfig {
                capacity: 16_384,
                max_bytes: 16 << 20,
                ttl: Duration::from_secs(900),
            },
            pressure_threshold: 0.9,
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: CachedDecision,
    inserted_at: Instant,
    ttl: Duration,
    access_count: u32,
    last_accessed: Instant,
    bytes: usize,
}

#[derive(Debug, Default)]
struct Tier {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    bytes: usize,
}

#[derive(Debug, Default)]
struct State {
    tiers: [Tier; TIER_COUNT],
    tag_index: HashMap<String, HashSet<String>>,
    key_tags: HashMap<String, Vec<String>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Hot/warm/cold decision cache with LRU tiers and a reverse tag index.
///
/// New entries land in the hot tier. A hit in a colder tier promotes the
/// entry one tier up; capacity eviction demotes entries that were accessed
/// more than once and discards the rest. All tiers share one lock and one
/// tag index, so the index never references a key that is not live.
#[derive(Debug, Clone)]
pub struct TieredCache {
    inner: Arc<Mutex<State>>,
    config: TieredConfig,
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::new(TieredConfig::default())
    }
}

impl TieredCache {
    /// Creates a cache with the given tier configuration.
    pub fn new(config: TieredConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::default())),
            config,
        }
    }

    fn tier_config(&self, tier: usize) -> &TierConfig {
        match tier {
            HOT => &self.config.hot,
            WARM => &self.config.warm,
            _ => &self.config.cold,
        }
    }

    fn entry_bytes(key: &str, value: &CachedDecision) -> usize {
        let deps: usize = value.dependencies.iter().map(String::len).sum();
        key.len() + deps + ENTRY_OVERHEAD
    }

    fn find_tier(state: &State, key: &str) -> Option<usize> {
        (HOT..TIER_COUNT).find(|&tier| state.tiers[tier].entries.contains_key(key))
    }

    fn detach(state: &mut State, tier: usize, key: &str) -> Option<Entry> {
        let tier = &mut state.tiers[tier];
        let entry = tier.entries.remove(key)?;
        tier.order.retain(|existing| existing != key);
        tier.bytes -= entry.bytes;
        Some(entry)
    }

    fn attach(state: &mut State, tier: usize, key: String, entry: Entry) {
        let tier = &mut state.tiers[tier];
        tier.bytes += entry.bytes;
        tier.entries.insert(key.clone(), entry);
        tier.order.push_back(key);
    }

    fn untag(state: &mut State, key: &str) {
        if let Some(tags) = state.key_tags.remove(key) {
            for tag in tags {
                if let Some(keys) = state.tag_index.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        state.tag_index.remove(&tag);
                    }
                }
            }
        }
    }

    fn discard(state: &mut State, tier: usize, key: &str, count_eviction: bool) {
        if Self::detach(state, tier, key).is_some() {
            Self::untag(state, key);
            if count_eviction {
                state.evictions += 1;
            }
        }
    }

    fn is_expired(entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > entry.ttl
    }

    /// Drops expired entries, then demotes or discards past-capacity ones,
    /// cascading hot -> warm -> cold.
    fn enforce(&self, state: &mut State, now: Instant) {
        for tier in HOT..TIER_COUNT {
            let expired: Vec<String> = state.tiers[tier]
                .entries
                .iter()
                .filter(|(_, entry)| Self::is_expired(entry, now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                Self::discard(state, tier, &key, true);
            }

            let limits = self.tier_config(tier);
            while state.tiers[tier].entries.len() > limits.capacity
                || state.tiers[tier].bytes > limits.max_bytes
            {
                let Some(key) = state.tiers[tier].order.front().cloned() else {
                    break;
                };
                let Some(entry) = Self::detach(state, tier, &key) else {
                    break;
                };
                if tier + 1 < TIER_COUNT && entry.access_count > 1 {
                    Self::attach(state, tier + 1, key, entry);
                } else {
                    Self::untag(state, &key);
                    state.evictions += 1;
                }
            }
        }
    }

    fn total_bytes(state: &State) -> usize {
        state.tiers.iter().map(|tier| tier.bytes).sum()
    }

    fn total_entries(state: &State) -> usize {
        state.tiers.iter().map(|tier| tier.entries.len()).sum()
    }

    /// Verifies that every tag references only live keys. Test hook for the
    /// tag-index soundness invariant.
    #[cfg(test)]
    pub(crate) fn tag_index_sound(&self) -> bool {
        let state = self.inner.lock().expect("poisoned lock");
        state.tag_index.values().flatten().all(|key| {
            (HOT..TIER_COUNT).any(|tier| state.tiers[tier].entries.contains_key(key))
        })
    }

    #[cfg(test)]
    pub(crate) fn tier_len(&self, tier: usize) -> usize {
        let state = self.inner.lock().expect("poisoned lock");
        state.tiers[tier].entries.len()
    }
}

#[async_trait]
impl DecisionCache for TieredCache {
    async fn get(&self, key: &str) -> Option<CachedDecision> {
        let now = Instant::now();
        let mut state = self.inner.lock().expect("poisoned lock");

        let Some(tier) = Self::find_tier(&state, key) else {
            state.misses += 1;
            return None;
        };

        if Self::is_expired(&state.tiers[tier].entries[key], now) {
            Self::discard(&mut state, tier, key, true);
            state.misses += 1;
            return None;
        }

        let mut entry = Self::detach(&mut state, tier, key).expect("entry just found");
        entry.access_count += 1;
        entry.last_accessed = now;
        let value = entry.value.clone();

        let target = tier.saturating_sub(1);
        Self::attach(&mut state, target, key.to_string(), entry);
        if target != tier {
            self.enforce(&mut state, now);
        }

        state.hits += 1;
        Some(value)
    }

    async fn set(
        &self,
        key: String,
        value: CachedDecision,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) {
        let now = Instant::now();
        let mut state = self.inner.lock().expect("poisoned lock");

        if let Some(tier) = Self::find_tier(&state, &key) {
            Self::discard(&mut state, tier, &key, false);
        }

        let entry = Entry {
            bytes: Self::entry_bytes(&key, &value),
            value,
            inserted_at: now,
            ttl: ttl.unwrap_or(self.config.hot.ttl),
            access_count: 1,
            last_accessed: now,
        };

        for tag in &tags {
            state
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        state.key_tags.insert(key.clone(), tags);

        Self::attach(&mut state, HOT, key, entry);
        self.enforce(&mut state, now);
    }

    async fn delete(&self, key: &str) {
        let mut state = self.inner.lock().expect("poisoned lock");
        if let Some(tier) = Self::find_tier(&state, key) {
            Self::discard(&mut state, tier, key, false);
        }
    }

    async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut state = self.inner.lock().expect("poisoned lock");
        let Some(keys) = state.tag_index.remove(tag) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if let Some(tier) = Self::find_tier(&state, &key) {
                Self::discard(&mut state, tier, &key, false);
                removed += 1;
            }
        }
        removed
    }

    async fn clear(&self) {
        let mut state = self.inner.lock().expect("poisoned lock");
        *state = State {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            ..State::default()
        };
    }

    fn stats(&self) -> CacheStats {
        let state = self.inner.lock().expect("poisoned lock");
        CacheStats {
            size: Self::total_entries(&state),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            approx_bytes: Self::total_bytes(&state),
        }
    }

    fn under_pressure(&self) -> bool {
        let state = self.inner.lock().expect("poisoned lock");
        let budget =
            self.config.hot.max_bytes + self.config.warm.max_bytes + self.config.cold.max_bytes;
        Self::total_bytes(&state) as f64 > budget as f64 * self.config.pressure_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn decision(granted: bool) -> CachedDecision {
        CachedDecision {
            granted,
            dependencies: vec!["documents:read".to_string()],
        }
    }

    fn small_cache(hot_capacity: usize) -> TieredCache {
        TieredCache::new(TieredConfig {
            hot: TierConfig {
                capacity: hot_capacity,
                max_bytes: 1 << 20,
                ttl: Duration::from_secs(60),
            },
            warm: TierConfig {
                capacity: 4,
                max_bytes: 1 << 20,
                ttl: Duration::from_secs(60),
            },
            cold: TierConfig {
                capacity: 4,
                max_bytes: 1 << 20,
                ttl: Duration::from_secs(60),
            },
            pressure_threshold: 0.9,
        })
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn get_should_return_what_set_stored() {
        let cache = small_cache(4);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));

        let hit = block_on(cache.get("k1")).expect("hit");
        assert!(hit.granted);
        assert_eq!(hit.dependencies, vec!["documents:read".to_string()]);
        assert!(block_on(cache.get("missing")).is_none());
    }

    #[test]
    fn delete_should_remove_key_and_its_tags() {
        let cache = small_cache(4);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));

        block_on(cache.delete("k1"));
        assert!(block_on(cache.get("k1")).is_none());
        // The tag must not keep pointing at the deleted key.
        assert_eq!(block_on(cache.invalidate_tag("user:u1")), 0);
        assert!(cache.tag_index_sound());
    }

    #[test]
    fn invalidate_tag_should_evict_all_tagged_keys() {
        let cache = small_cache(4);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));
        block_on(cache.set(
            "k2".into(),
            decision(false),
            None,
            tags(&["user:u1", "role:r1"]),
        ));
        block_on(cache.set("k3".into(), decision(true), None, tags(&["user:u2"])));

        let removed = block_on(cache.invalidate_tag("user:u1"));
        assert_eq!(removed, 2);
        assert!(block_on(cache.get("k1")).is_none());
        assert!(block_on(cache.get("k2")).is_none());
        assert!(block_on(cache.get("k3")).is_some());
        assert!(cache.tag_index_sound());
    }

    #[test]
    fn capacity_eviction_should_demote_reaccessed_entries() {
        let cache = small_cache(2);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));
        // Second access marks k1 worth keeping on eviction.
        let _ = block_on(cache.get("k1"));
        block_on(cache.set("k2".into(), decision(true), None, tags(&["user:u1"])));
        block_on(cache.set("k3".into(), decision(true), None, tags(&["user:u1"])));

        assert_eq!(cache.tier_len(HOT), 2);
        assert_eq!(cache.tier_len(WARM), 1);
        assert!(block_on(cache.get("k1")).is_some());
        assert!(cache.tag_index_sound());
    }

    #[test]
    fn single_access_entries_should_be_discarded_on_eviction() {
        let cache = small_cache(1);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));
        block_on(cache.set("k2".into(), decision(true), None, tags(&["user:u1"])));

        assert!(block_on(cache.get("k1")).is_none());
        assert!(block_on(cache.get("k2")).is_some());
        assert!(cache.stats().evictions >= 1);
        assert!(cache.tag_index_sound());
    }

    #[test]
    fn warm_hit_should_promote_back_to_hot() {
        let cache = small_cache(2);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));
        let _ = block_on(cache.get("k1"));
        block_on(cache.set("k2".into(), decision(true), None, tags(&["user:u1"])));
        block_on(cache.set("k3".into(), decision(true), None, tags(&["user:u1"])));
        assert_eq!(cache.tier_len(WARM), 1);

        let _ = block_on(cache.get("k1"));
        assert_eq!(cache.tier_len(WARM), 0);
        assert!(cache.tag_index_sound());
    }

    #[test]
    fn ttl_should_expire_entries() {
        let cache = small_cache(4);
        block_on(cache.set(
            "k1".into(),
            decision(true),
            Some(Duration::from_millis(5)),
            tags(&["user:u1"]),
        ));
        std::thread::sleep(Duration::from_millis(15));

        assert!(block_on(cache.get("k1")).is_none());
        assert!(cache.tag_index_sound());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwrite_should_replace_tags() {
        let cache = small_cache(4);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));
        block_on(cache.set("k1".into(), decision(false), None, tags(&["user:u2"])));

        assert_eq!(block_on(cache.invalidate_tag("user:u1")), 0);
        assert!(block_on(cache.get("k1")).is_some());
        assert_eq!(block_on(cache.invalidate_tag("user:u2")), 1);
        assert!(cache.tag_index_sound());
    }

    #[test]
    fn clear_should_drop_entries_and_tags() {
        let cache = small_cache(4);
        block_on(cache.set("k1".into(), decision(true), None, tags(&["user:u1"])));
        block_on(cache.clear());

        assert!(block_on(cache.get("k1")).is_none());
        assert_eq!(block_on(cache.invalidate_tag("user:u1")), 0);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn byte_cap_should_trigger_eviction() {
        let cache = TieredCache::new(TieredConfig {
            hot: TierConfig {
                capacity: 1_000,
                max_bytes: 300,
                ttl: Duration::from_secs(60),
            },
            warm: TierConfig {
                capacity: 1_000,
                max_bytes: 300,
                ttl: Duration::from_secs(60),
            },
            cold: TierConfig {
                capacity: 1_000,
                max_bytes: 300,
                ttl: Duration::from_secs(60),
            },
            pressure_threshold: 0.5,
        });

        for i in 0..8 {
            block_on(cache.set(format!("key_{i}"), decision(true), None, tags(&["user:u1"])));
        }

        let stats = cache.stats();
        assert!(stats.approx_bytes <= 900);
        assert!(stats.evictions > 0);
        assert!(cache.tag_index_sound());
    }
}
