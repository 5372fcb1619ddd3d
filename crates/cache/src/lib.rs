//! # Durandal Cache — RAMR
//!
//! The Rapid Access Memory Register: a tiered cache for previously computed
//! values (summaries, context fragments, retrieval results) keyed by opaque
//! strings.
//!
//! - **T1 (memory)** — bounded in-process map, non-blocking probes.
//! - **T2 (embedded)** — bounded SQLite table; every admitted entry lands
//!   here unless inserted `memory_only`.
//! - **T3 (durable)** — declared in the data model, not wired; no runtime
//!   path promotes into it.
//!
//! Admission is scored (`scoring::cache_worthiness`), eviction keeps the
//! highest-retention entries, and `get_relevant` ranks live entries against
//! a query string.

pub mod scoring;
mod tier1;
mod tier2;

use chrono::Utc;
use durandal_config::EngineConfig;
use durandal_core::{CacheEntry, CacheError, CacheHints, CacheStats, CacheTier, Stored};
use std::sync::atomic::{AtomicU64, Ordering};
use tier1::MemoryTier;
use tier2::EmbeddedTier;
use tracing::{debug, warn};

/// Priority at or above which an admitted entry is mirrored into T1 on put.
const MIRROR_PRIORITY: i64 = 7;

/// Priority at or above which a T2 hit is promoted into T1.
const PROMOTE_PRIORITY: i64 = 6;

/// Serialized-value prefix length used for admission and relevance scoring.
const PREVIEW_CHARS: usize = 256;

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    embedded_hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

/// The three-tier cache.
pub struct Ramr {
    tier1: MemoryTier,
    tier2: EmbeddedTier,
    ttl: durandal_config::TtlConfig,
    counters: Counters,
}

impl Ramr {
    /// Open the cache with the given configuration.
    pub async fn open(config: &EngineConfig) -> Result<Self, CacheError> {
        let tier2 =
            EmbeddedTier::open(&config.cache_db_path, config.embedded_capacity_entries).await?;
        Ok(Self {
            tier1: MemoryTier::new(config.memory_capacity),
            tier2,
            ttl: config.ttl.clone(),
            counters: Counters::default(),
        })
    }

    /// Store a value under `key`, subject to admission scoring.
    ///
    /// Serialization failures fail this call only. An embedded-tier I/O
    /// failure degrades the entry to memory-only and sets `warned`.
    pub async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        hints: CacheHints,
    ) -> Result<Stored, CacheError> {
        let serialized =
            serde_json::to_string(&value).map_err(|e| CacheError::Serialize(e.to_string()))?;
        let size_bytes = serialized.len() as i64;
        let preview: String = serialized.chars().take(PREVIEW_CHARS).collect();

        let admission = scoring::cache_worthiness(&hints, &preview, size_bytes);
        let ttl = hints.ttl.unwrap_or_else(|| {
            chrono::Duration::seconds(self.ttl.for_type(hints.value_type.as_deref()) as i64)
        });

        if !admission.should_cache {
            debug!(key, priority = admission.priority, "Value not admitted");
            return Ok(Stored {
                admitted: false,
                priority: admission.priority,
                ttl,
                warned: false,
            });
        }

        let now = Utc::now();
        let mut metadata = serde_json::Map::new();
        if let Some(value_type) = &hints.value_type {
            metadata.insert("type".into(), serde_json::Value::String(value_type.clone()));
        }
        if let Some(importance) = &hints.importance {
            metadata.insert(
                "importance".into(),
                serde_json::Value::String(importance.clone()),
            );
        }

        let entry = CacheEntry {
            key: key.to_string(),
            value,
            tier: CacheTier::Ramr,
            expires_at: now + ttl,
            priority: admission.priority,
            access_count: 0,
            last_accessed: now,
            size_bytes,
            metadata,
        };

        self.counters.puts.fetch_add(1, Ordering::Relaxed);

        if hints.memory_only {
            let evicted = self.tier1.insert(entry, now);
            self.note_evictions(evicted.len());
            return Ok(Stored {
                admitted: true,
                priority: admission.priority,
                ttl,
                warned: false,
            });
        }

        let mut warned = false;
        match self.tier2.upsert(&entry).await {
            Ok(()) => {
                match self.tier2.enforce_capacity(key, now).await {
                    Ok(swept) => {
                        // A T2 eviction removes the entry entirely,
                        // memory-tier mirror included.
                        for victim in &swept {
                            self.tier1.remove(victim);
                        }
                        self.note_evictions(swept.len());
                    }
                    Err(e) => warn!(key, "Capacity sweep failed: {e}"),
                }
                if admission.priority >= MIRROR_PRIORITY {
                    let evicted = self.tier1.insert(entry, now);
                    self.note_evictions(evicted.len());
                }
            }
            Err(CacheError::Serialize(e)) => return Err(CacheError::Serialize(e)),
            Err(e) => {
                // Degrade to memory-only; the caller still gets a success.
                warn!(key, "Embedded tier write failed, keeping in memory: {e}");
                let evicted = self.tier1.insert(entry, now);
                self.note_evictions(evicted.len());
                warned = true;
            }
        }

        Ok(Stored {
            admitted: true,
            priority: admission.priority,
            ttl,
            warned,
        })
    }

    /// Look up a value. T1 first; on a T1 miss, T2 with opportunistic
    /// promotion. Never returns an expired value. Embedded-tier failures
    /// log and read as a miss.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Utc::now();

        if let Some(entry) = self.tier1.get(key, now) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value);
        }

        match self.tier2.get(key, now).await {
            Ok(Some(entry)) => {
                self.counters.embedded_hits.fetch_add(1, Ordering::Relaxed);
                if entry.priority >= PROMOTE_PRIORITY {
                    let evicted = self.tier1.insert(entry.clone(), now);
                    self.note_evictions(evicted.len());
                }
                Some(entry.value)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key, "Embedded tier read failed: {e}");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// The top `max` live entries ranked by relevance to `query`.
    ///
    /// Embedded-tier failures log and return an empty list.
    pub async fn get_relevant(
        &self,
        query: &str,
        max: usize,
    ) -> Vec<(String, serde_json::Value, f64)> {
        let now = Utc::now();
        let entries = match self.tier2.scan_valid(now).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Relevance scan failed: {e}");
                return Vec::new();
            }
        };

        let tokens = scoring::query_tokens(query);
        let mut scored: Vec<(String, serde_json::Value, f64)> = entries
            .into_iter()
            .map(|entry| {
                let preview: String = entry
                    .value
                    .to_string()
                    .chars()
                    .take(PREVIEW_CHARS)
                    .collect();
                let text = format!("{} {}", entry.key, preview);
                let score = scoring::relevance_score(
                    &tokens,
                    &text,
                    entry.priority,
                    entry.last_accessed,
                    now,
                );
                (entry.key, entry.value, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(max);
        scored
    }

    /// Remove a key from both tiers.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.tier1.remove(key);
        self.tier2.remove(key).await?;
        Ok(())
    }

    /// Remove every key starting with `prefix` from both tiers.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let t1 = self.tier1.remove_prefix(prefix) as u64;
        let t2 = self.tier2.remove_prefix(prefix).await?;
        Ok(t1.max(t2))
    }

    /// Snapshot cache statistics.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now();
        Ok(CacheStats {
            total_entries: self.tier2.count_total().await?,
            valid_entries: self.tier2.count_valid(now).await?,
            memory_entries: self.tier1.len() as u64,
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            embedded_hits: self.counters.embedded_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        })
    }

    /// Reset the hit/miss/put/eviction counters.
    pub fn reset_counters(&self) {
        self.counters.memory_hits.store(0, Ordering::Relaxed);
        self.counters.embedded_hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.puts.store(0, Ordering::Relaxed);
        self.counters.evictions.store(0, Ordering::Relaxed);
    }

    /// Remove expired entries from both tiers. Idempotent.
    pub async fn reap_expired(&self) -> Result<u64, CacheError> {
        let now = Utc::now();
        let t1 = self.tier1.reap(now) as u64;
        let t2 = self.tier2.reap(now).await?;
        Ok(t1.max(t2))
    }

    fn note_evictions(&self, count: usize) {
        if count > 0 {
            self.counters
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ramr() -> Ramr {
        Ramr::open(&EngineConfig::default()).await.unwrap()
    }

    async fn small_ramr(memory_capacity: usize) -> Ramr {
        let config = EngineConfig {
            memory_capacity,
            ..EngineConfig::default()
        };
        Ramr::open(&config).await.unwrap()
    }

    fn hints(value_type: &str) -> CacheHints {
        CacheHints {
            value_type: Some(value_type.into()),
            ..CacheHints::default()
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let cache = ramr().await;
        let stored = cache
            .put("k1", serde_json::json!({"answer": 42}), CacheHints::default())
            .await
            .unwrap();
        assert!(stored.admitted);

        let value = cache.get("k1").await.unwrap();
        assert_eq!(value["answer"], 42);
    }

    #[tokio::test]
    async fn casual_value_is_not_admitted() {
        let cache = ramr().await;
        let stored = cache
            .put("chit", serde_json::json!("hey"), hints("casual"))
            .await
            .unwrap();
        assert!(!stored.admitted);
        assert!(cache.get("chit").await.is_none());
    }

    #[tokio::test]
    async fn solution_gets_long_ttl_and_mirrors_to_memory() {
        let cache = ramr().await;
        let stored = cache
            .put("sol", serde_json::json!("restart the worker"), hints("solution"))
            .await
            .unwrap();
        assert_eq!(stored.priority, 8);
        assert_eq!(stored.ttl, chrono::Duration::hours(24));
        // Priority 8 ≥ 7 mirrors into T1
        assert_eq!(cache.stats().await.unwrap().memory_entries, 1);
    }

    #[tokio::test]
    async fn ttl_hint_overrides_type_default() {
        let cache = ramr().await;
        let stored = cache
            .put(
                "s",
                serde_json::json!("x"),
                CacheHints {
                    value_type: Some("summary".into()),
                    ttl: Some(chrono::Duration::seconds(90)),
                    ..CacheHints::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(stored.ttl, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn default_priority_stays_out_of_memory_tier() {
        let cache = ramr().await;
        cache
            .put("plain", serde_json::json!("ordinary text"), CacheHints::default())
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory_entries, 0);
        // Still retrievable from the embedded tier
        assert!(cache.get("plain").await.is_some());
    }

    #[tokio::test]
    async fn memory_only_skips_embedded_tier() {
        let cache = ramr().await;
        cache
            .put(
                "m",
                serde_json::json!("volatile"),
                CacheHints {
                    priority: Some(9),
                    memory_only: true,
                    ..CacheHints::default()
                },
            )
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory_entries, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn invalidate_removes_from_both_tiers() {
        let cache = ramr().await;
        cache
            .put("gone", serde_json::json!("x"), hints("solution"))
            .await
            .unwrap();
        cache.invalidate("gone").await.unwrap();
        assert!(cache.get("gone").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_prefix_clears_namespace() {
        let cache = ramr().await;
        cache
            .put("artifacts:p1:a", serde_json::json!(1), CacheHints::default())
            .await
            .unwrap();
        cache
            .put("artifacts:p1:b", serde_json::json!(2), CacheHints::default())
            .await
            .unwrap();
        cache
            .put("artifacts:p2:c", serde_json::json!(3), CacheHints::default())
            .await
            .unwrap();

        cache.invalidate_prefix("artifacts:p1:").await.unwrap();
        assert!(cache.get("artifacts:p1:a").await.is_none());
        assert!(cache.get("artifacts:p1:b").await.is_none());
        assert!(cache.get("artifacts:p2:c").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        let cache = ramr().await;
        cache
            .put(
                "fleeting",
                serde_json::json!("x"),
                CacheHints {
                    ttl: Some(chrono::Duration::seconds(-5)),
                    ..CacheHints::default()
                },
            )
            .await
            .unwrap();
        assert!(cache.get("fleeting").await.is_none());
    }

    #[tokio::test]
    async fn reap_expired_is_idempotent() {
        let cache = ramr().await;
        cache
            .put(
                "dead",
                serde_json::json!("x"),
                CacheHints {
                    ttl: Some(chrono::Duration::seconds(-5)),
                    ..CacheHints::default()
                },
            )
            .await
            .unwrap();
        cache
            .put("live", serde_json::json!("y"), CacheHints::default())
            .await
            .unwrap();

        assert_eq!(cache.reap_expired().await.unwrap(), 1);
        assert_eq!(cache.reap_expired().await.unwrap(), 0);
        assert!(cache.get("live").await.is_some());
    }

    #[tokio::test]
    async fn eviction_order_follows_retention() {
        let cache = small_ramr(3).await;

        let put = |key: &'static str, priority: i64| {
            let cache = &cache;
            async move {
                cache
                    .put(
                        key,
                        serde_json::json!("v"),
                        CacheHints {
                            priority: Some(priority),
                            memory_only: true,
                            ..CacheHints::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        };

        put("c", 5).await;
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        put("a", 9).await;
        put("b", 5).await;
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;

        // T1 is full; inserting D evicts C (lowest priority ∧ oldest).
        put("d", 7).await;

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory_entries, 3);
        assert_eq!(stats.evictions, 1);

        // A, B, D survive in the memory tier; C is gone entirely
        // (memory-only entries have no embedded copy).
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("d").await.is_some());
        assert!(cache.get("c").await.is_none());
    }

    #[tokio::test]
    async fn get_relevant_ranks_by_overlap() {
        let cache = ramr().await;
        cache
            .put(
                "note:eviction",
                serde_json::json!("cache eviction keeps high priority entries"),
                CacheHints::default(),
            )
            .await
            .unwrap();
        cache
            .put(
                "note:pasta",
                serde_json::json!("boil water and add salt"),
                CacheHints::default(),
            )
            .await
            .unwrap();

        let ranked = cache.get_relevant("cache eviction priority", 5).await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "note:eviction");
        assert!(ranked[0].2 > ranked[1].2);
    }

    #[tokio::test]
    async fn get_relevant_respects_max() {
        let cache = ramr().await;
        for i in 0..8 {
            cache
                .put(
                    &format!("note:{i}"),
                    serde_json::json!(format!("shared topic entry {i}")),
                    CacheHints::default(),
                )
                .await
                .unwrap();
        }
        let ranked = cache.get_relevant("shared topic", 5).await;
        assert_eq!(ranked.len(), 5);
    }

    #[tokio::test]
    async fn stats_counts_hits_and_misses() {
        let cache = ramr().await;
        cache
            .put("k", serde_json::json!("v"), hints("solution"))
            .await
            .unwrap();

        cache.get("k").await; // memory hit (mirrored at priority 8)
        cache.get("absent").await; // miss

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);

        cache.reset_counters();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory_hits, 0);
        assert_eq!(stats.puts, 0);
    }

    #[tokio::test]
    async fn t2_hit_promotes_high_priority_into_memory() {
        let cache = ramr().await;
        // Priority 6: admitted, not mirrored on put (< 7), promoted on get (≥ 6).
        cache
            .put(
                "promoted",
                serde_json::json!("v"),
                CacheHints {
                    priority: Some(6),
                    ..CacheHints::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cache.stats().await.unwrap().memory_entries, 0);

        cache.get("promoted").await.unwrap();
        assert_eq!(cache.stats().await.unwrap().memory_entries, 1);

        // Second get is a memory hit
        cache.get("promoted").await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.embedded_hits, 1);
        assert_eq!(stats.memory_hits, 1);
    }
}
