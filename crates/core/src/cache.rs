//! Cache entry domain types shared between the RAMR tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tier currently holds an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// T1 — in-process map.
    Memory,
    /// T2 — embedded relational store.
    Ramr,
    /// T3 — long-horizon durable store. Declared for wire compatibility;
    /// no runtime path currently produces it.
    Durable,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Ramr => "ramr",
            CacheTier::Durable => "durable",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "memory" => CacheTier::Memory,
            "durable" => CacheTier::Durable,
            _ => CacheTier::Ramr,
        }
    }
}

/// Caller-supplied hints for `Ramr::put`.
#[derive(Debug, Clone, Default)]
pub struct CacheHints {
    /// Value type tag (`code`, `solution`, `summary`, `retrieval`, …).
    pub value_type: Option<String>,

    /// Caller-asserted importance note, stored in entry metadata.
    pub importance: Option<String>,

    /// Starting priority before admission adjustments. Defaults to 5.
    pub priority: Option<i64>,

    /// TTL override. When absent the per-type default table applies.
    pub ttl: Option<chrono::Duration>,

    /// Keep the entry out of the embedded tier entirely.
    pub memory_only: bool,
}

/// A cached value plus its bookkeeping header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-supplied opaque key.
    pub key: String,

    /// The cached value. JSON so unknown fields survive round-trips.
    pub value: serde_json::Value,

    /// The tier that produced this view of the entry.
    pub tier: CacheTier,

    /// Hard expiry. Entries at or past this instant are invisible.
    pub expires_at: DateTime<Utc>,

    /// Admission priority in `[1, 10]`.
    pub priority: i64,

    /// Monotonic per-entry access counter.
    pub access_count: i64,

    /// Last access instant. Monotonic across a process lifetime.
    pub last_accessed: DateTime<Utc>,

    /// Serialized size of the value in bytes.
    pub size_bytes: i64,

    /// Caller-tagged metadata (`type`, `importance`, arbitrary notes).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CacheEntry {
    /// Whether the entry is expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The outcome of a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    /// Whether admission accepted the value.
    pub admitted: bool,

    /// Final priority after admission adjustments.
    pub priority: i64,

    /// TTL applied to the entry.
    pub ttl: chrono::Duration,

    /// Set when the embedded tier failed and the value was kept in memory
    /// only (or dropped). The call still succeeds.
    pub warned: bool,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total entries in the embedded tier (including expired, pre-reap).
    pub total_entries: u64,

    /// Non-expired entries in the embedded tier.
    pub valid_entries: u64,

    /// Entries currently mirrored in the memory tier.
    pub memory_entries: u64,

    /// Memory-tier hits since the last counter reset.
    pub memory_hits: u64,

    /// Embedded-tier hits since the last counter reset.
    pub embedded_hits: u64,

    /// Misses since the last counter reset.
    pub misses: u64,

    /// Admitted puts since the last counter reset.
    pub puts: u64,

    /// Evictions since the last counter reset.
    pub evictions: u64,
}
