//! T1 — the in-process memory tier.
//!
//! A bounded map under a `std::sync::RwLock`. The lock is never held across
//! an await point; every operation here is synchronous and non-blocking in
//! the async sense.

use crate::scoring;
use chrono::{DateTime, Utc};
use durandal_core::{CacheEntry, CacheTier};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Probe for a live entry, bumping its access counters on hit.
    /// Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                entry.last_accessed = now;
                Some(entry.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert an entry, evicting the lowest-retention resident when at
    /// capacity. The inserted key itself is never an eviction candidate.
    /// Returns the evicted keys.
    pub fn insert(&self, mut entry: CacheEntry, now: DateTime<Utc>) -> Vec<String> {
        entry.tier = CacheTier::Memory;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut evicted = Vec::new();

        if !entries.contains_key(&entry.key) && entries.len() >= self.capacity {
            if let Some(victim) = Self::pick_victim(&entries, &entry.key, now) {
                entries.remove(&victim);
                evicted.push(victim);
            }
        }
        entries.insert(entry.key.clone(), entry);
        evicted
    }

    /// The lowest-retention key, excluding `protected`. Ties break toward
    /// the older entry, then lexicographically, to stay deterministic.
    fn pick_victim(
        entries: &HashMap<String, CacheEntry>,
        protected: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let max_age_ms = entries
            .values()
            .filter(|e| e.key != protected)
            .map(|e| (now - e.last_accessed).num_milliseconds().max(0))
            .max()?;

        entries
            .values()
            .filter(|e| e.key != protected)
            .map(|e| {
                let retention =
                    scoring::retention_score(e.priority, e.last_accessed, now, max_age_ms);
                (retention, e.last_accessed, e.key.clone())
            })
            .min_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
                    .then_with(|| a.2.cmp(&b.2))
            })
            .map(|(_, _, key)| key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn reap(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, priority: i64, last_accessed: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: key.into(),
            value: serde_json::json!({ "k": key }),
            tier: CacheTier::Memory,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            priority,
            access_count: 0,
            last_accessed,
            size_bytes: 16,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn get_bumps_counters() {
        let tier = MemoryTier::new(10);
        let now = Utc::now();
        tier.insert(entry("a", 5, now), now);

        let hit = tier.get("a", now).unwrap();
        assert_eq!(hit.access_count, 1);
        let hit = tier.get("a", now).unwrap();
        assert_eq!(hit.access_count, 2);
    }

    #[test]
    fn expired_entry_is_invisible_and_reaped() {
        let tier = MemoryTier::new(10);
        let now = Utc::now();
        let mut e = entry("a", 5, now);
        e.expires_at = now - chrono::Duration::seconds(1);
        tier.insert(e, now);

        assert!(tier.get("a", now).is_none());
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn eviction_removes_lowest_priority_oldest() {
        let tier = MemoryTier::new(3);
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(5);

        tier.insert(entry("a", 9, now), now);
        tier.insert(entry("b", 5, now), now);
        tier.insert(entry("c", 5, old), now);

        let evicted = tier.insert(entry("d", 7, now), now);
        assert_eq!(evicted, vec!["c".to_string()]);
        assert!(tier.contains("a"));
        assert!(tier.contains("b"));
        assert!(tier.contains("d"));
        assert_eq!(tier.len(), 3);
    }

    #[test]
    fn at_capacity_triggers_exactly_one_eviction() {
        let tier = MemoryTier::new(2);
        let now = Utc::now();
        tier.insert(entry("a", 5, now), now);
        tier.insert(entry("b", 5, now), now);

        let evicted = tier.insert(entry("c", 5, now), now);
        assert_eq!(evicted.len(), 1);
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let tier = MemoryTier::new(2);
        let now = Utc::now();
        tier.insert(entry("a", 5, now), now);
        tier.insert(entry("b", 5, now), now);

        let evicted = tier.insert(entry("a", 8, now), now);
        assert!(evicted.is_empty());
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn remove_prefix_clears_matching_keys() {
        let tier = MemoryTier::new(10);
        let now = Utc::now();
        tier.insert(entry("artifacts:p1:x", 5, now), now);
        tier.insert(entry("artifacts:p1:y", 5, now), now);
        tier.insert(entry("summary:s1:z", 5, now), now);

        assert_eq!(tier.remove_prefix("artifacts:p1:"), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("summary:s1:z"));
    }

    #[test]
    fn reap_drops_only_expired() {
        let tier = MemoryTier::new(10);
        let now = Utc::now();
        let mut dead = entry("dead", 5, now);
        dead.expires_at = now - chrono::Duration::seconds(10);
        tier.insert(dead, now);
        tier.insert(entry("live", 5, now), now);

        assert_eq!(tier.reap(now), 1);
        assert!(tier.contains("live"));
    }
}
