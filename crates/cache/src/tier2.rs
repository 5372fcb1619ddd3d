//! T2 — the embedded SQLite tier.
//!
//! One `cache_entries` table holds every admitted entry. A secondary index
//! on `expires_at` keeps reaping cheap; a `(priority_score DESC,
//! last_accessed DESC)` index supports eviction scans. Timestamps are unix
//! milliseconds so both indexes support range comparisons.

use crate::scoring;
use chrono::{DateTime, Utc};
use durandal_core::{CacheEntry, CacheError, CacheTier};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct EmbeddedTier {
    pool: SqlitePool,
    capacity: usize,
}

impl EmbeddedTier {
    /// Open (or create) the embedded tier at `path`.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral tier.
    pub async fn open(path: &str, capacity: usize) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| CacheError::Io(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database exists per connection; pooling past one
        // connection would shard it.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to open cache store: {e}")))?;

        let tier = Self { pool, capacity };
        tier.run_migrations().await?;
        info!("Embedded cache tier initialized at {path}");
        Ok(tier)
    }

    async fn run_migrations(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key            TEXT PRIMARY KEY,
                value          TEXT NOT NULL,
                cache_type     TEXT NOT NULL DEFAULT 'ramr',
                expires_at     INTEGER NOT NULL,
                priority_score INTEGER NOT NULL DEFAULT 5,
                access_count   INTEGER NOT NULL DEFAULT 0,
                last_accessed  INTEGER NOT NULL,
                created_at     INTEGER NOT NULL,
                size_bytes     INTEGER NOT NULL DEFAULT 0,
                metadata       TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Io(format!("cache_entries table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache_entries(expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Io(format!("expires_at index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_eviction \
             ON cache_entries(priority_score DESC, last_accessed DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Io(format!("eviction index: {e}")))?;

        debug!("Cache tier migrations complete");
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry, CacheError> {
        let key: String = row
            .try_get("key")
            .map_err(|e| CacheError::Io(format!("key column: {e}")))?;
        let value_json: String = row
            .try_get("value")
            .map_err(|e| CacheError::Io(format!("value column: {e}")))?;
        let cache_type: String = row
            .try_get("cache_type")
            .map_err(|e| CacheError::Io(format!("cache_type column: {e}")))?;
        let expires_at: i64 = row
            .try_get("expires_at")
            .map_err(|e| CacheError::Io(format!("expires_at column: {e}")))?;
        let priority: i64 = row
            .try_get("priority_score")
            .map_err(|e| CacheError::Io(format!("priority_score column: {e}")))?;
        let access_count: i64 = row
            .try_get("access_count")
            .map_err(|e| CacheError::Io(format!("access_count column: {e}")))?;
        let last_accessed: i64 = row
            .try_get("last_accessed")
            .map_err(|e| CacheError::Io(format!("last_accessed column: {e}")))?;
        let size_bytes: i64 = row
            .try_get("size_bytes")
            .map_err(|e| CacheError::Io(format!("size_bytes column: {e}")))?;
        let metadata_json: String = row
            .try_get("metadata")
            .map_err(|e| CacheError::Io(format!("metadata column: {e}")))?;

        let value = serde_json::from_str(&value_json)
            .map_err(|e| CacheError::Serialize(format!("stored value: {e}")))?;
        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(CacheEntry {
            key,
            value,
            tier: CacheTier::parse(&cache_type),
            expires_at: millis_to_utc(expires_at),
            priority,
            access_count,
            last_accessed: millis_to_utc(last_accessed),
            size_bytes,
            metadata,
        })
    }

    /// Insert or replace an entry.
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let value_json = serde_json::to_string(&entry.value)
            .map_err(|e| CacheError::Serialize(e.to_string()))?;
        let metadata_json = serde_json::to_string(&entry.metadata)
            .map_err(|e| CacheError::Serialize(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (key, value, cache_type, expires_at, priority_score,
                 access_count, last_accessed, created_at, size_bytes, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                cache_type = excluded.cache_type,
                expires_at = excluded.expires_at,
                priority_score = excluded.priority_score,
                last_accessed = excluded.last_accessed,
                size_bytes = excluded.size_bytes,
                metadata = excluded.metadata
            "#,
        )
        .bind(&entry.key)
        .bind(&value_json)
        .bind(CacheTier::Ramr.as_str())
        .bind(entry.expires_at.timestamp_millis())
        .bind(entry.priority)
        .bind(entry.access_count)
        .bind(entry.last_accessed.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .bind(entry.size_bytes)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Io(format!("cache upsert: {e}")))?;

        Ok(())
    }

    /// Fetch a live entry, bumping its access counters. An expired row is
    /// deleted on sight and reported as a miss.
    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheError::Io(format!("cache get: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut entry = Self::row_to_entry(&row)?;

        if entry.is_expired(now) {
            self.remove(key).await?;
            return Ok(None);
        }

        entry.access_count += 1;
        entry.last_accessed = now;
        sqlx::query(
            "UPDATE cache_entries SET access_count = ?1, last_accessed = ?2 WHERE key = ?3",
        )
        .bind(entry.access_count)
        .bind(now.timestamp_millis())
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Io(format!("cache touch: {e}")))?;

        Ok(Some(entry))
    }

    /// Every live entry, for relevance scans.
    pub async fn scan_valid(&self, now: DateTime<Utc>) -> Result<Vec<CacheEntry>, CacheError> {
        let rows = sqlx::query("SELECT * FROM cache_entries WHERE expires_at > ?1")
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CacheError::Io(format!("cache scan: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Io(format!("cache delete: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let result = sqlx::query("DELETE FROM cache_entries WHERE key LIKE ?1 ESCAPE '\\'")
            .bind(format!("{escaped}%"))
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Io(format!("cache prefix delete: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Delete expired rows. Idempotent.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Io(format!("cache reap: {e}")))?;
        Ok(result.rows_affected())
    }

    pub async fn count_total(&self) -> Result<u64, CacheError> {
        self.count_where("1=1", None).await
    }

    pub async fn count_valid(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        self.count_where("expires_at > ?1", Some(now.timestamp_millis()))
            .await
    }

    async fn count_where(&self, clause: &str, bound: Option<i64>) -> Result<u64, CacheError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM cache_entries WHERE {clause}");
        let mut query = sqlx::query(&sql);
        if let Some(value) = bound {
            query = query.bind(value);
        }
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CacheError::Io(format!("cache count: {e}")))?;
        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| CacheError::Io(format!("cnt column: {e}")))?;
        Ok(cnt as u64)
    }

    /// When over capacity, delete the lowest-retention entries until the
    /// tier is at or under the soft cap (90% of capacity). The key being
    /// inserted is never a victim. Returns the evicted keys so the memory
    /// tier can drop its mirrors — a T2 eviction removes the entry entirely.
    pub async fn enforce_capacity(
        &self,
        protected_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, CacheError> {
        let total = self.count_total().await?;
        if total <= self.capacity as u64 {
            return Ok(Vec::new());
        }

        let soft_cap = (self.capacity as f64 * 0.9) as u64;
        let to_remove = total.saturating_sub(soft_cap);

        let rows = sqlx::query(
            "SELECT key, priority_score, last_accessed FROM cache_entries WHERE key != ?1",
        )
        .bind(protected_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::Io(format!("eviction scan: {e}")))?;

        let candidates: Vec<(String, i64, i64)> = rows
            .iter()
            .map(|row| -> Result<_, CacheError> {
                let key: String = row
                    .try_get("key")
                    .map_err(|e| CacheError::Io(format!("key column: {e}")))?;
                let priority: i64 = row
                    .try_get("priority_score")
                    .map_err(|e| CacheError::Io(format!("priority column: {e}")))?;
                let last_accessed: i64 = row
                    .try_get("last_accessed")
                    .map_err(|e| CacheError::Io(format!("last_accessed column: {e}")))?;
                Ok((key, priority, last_accessed))
            })
            .collect::<Result<_, _>>()?;

        let max_age_ms = candidates
            .iter()
            .map(|(_, _, accessed)| (now.timestamp_millis() - accessed).max(0))
            .max()
            .unwrap_or(0);

        let mut scored: Vec<(f64, i64, String)> = candidates
            .into_iter()
            .map(|(key, priority, accessed)| {
                let retention =
                    scoring::retention_score(priority, millis_to_utc(accessed), now, max_age_ms);
                (retention, accessed, key)
            })
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut evicted = Vec::new();
        for (_, _, key) in scored.into_iter().take(to_remove as usize) {
            if self.remove(&key).await? {
                evicted.push(key);
            }
        }
        debug!(evicted = evicted.len(), "Embedded tier capacity sweep");
        Ok(evicted)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tier(capacity: usize) -> EmbeddedTier {
        EmbeddedTier::open("sqlite::memory:", capacity).await.unwrap()
    }

    fn entry(key: &str, priority: i64, ttl_secs: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            key: key.into(),
            value: serde_json::json!({ "payload": key }),
            tier: CacheTier::Ramr,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
            priority,
            access_count: 0,
            last_accessed: now,
            size_bytes: 32,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let tier = tier(100).await;
        tier.upsert(&entry("k1", 5, 3600)).await.unwrap();

        let hit = tier.get("k1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(hit.value, serde_json::json!({ "payload": "k1" }));
        assert_eq!(hit.access_count, 1);
        assert_eq!(hit.tier, CacheTier::Ramr);
    }

    #[tokio::test]
    async fn expired_row_is_deleted_on_get() {
        let tier = tier(100).await;
        tier.upsert(&entry("gone", 5, -10)).await.unwrap();

        assert!(tier.get("gone", Utc::now()).await.unwrap().is_none());
        assert_eq!(tier.count_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn access_count_is_monotonic() {
        let tier = tier(100).await;
        tier.upsert(&entry("k", 5, 3600)).await.unwrap();

        for expected in 1..=3 {
            let hit = tier.get("k", Utc::now()).await.unwrap().unwrap();
            assert_eq!(hit.access_count, expected);
        }
    }

    #[tokio::test]
    async fn scan_valid_excludes_expired() {
        let tier = tier(100).await;
        tier.upsert(&entry("live", 5, 3600)).await.unwrap();
        tier.upsert(&entry("dead", 5, -10)).await.unwrap();

        let live = tier.scan_valid(Utc::now()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "live");
    }

    #[tokio::test]
    async fn remove_prefix_targets_only_prefix() {
        let tier = tier(100).await;
        tier.upsert(&entry("artifacts:p1:a", 5, 3600)).await.unwrap();
        tier.upsert(&entry("artifacts:p1:b", 5, 3600)).await.unwrap();
        tier.upsert(&entry("artifacts:p2:c", 5, 3600)).await.unwrap();

        let removed = tier.remove_prefix("artifacts:p1:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tier.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reap_is_idempotent() {
        let tier = tier(100).await;
        tier.upsert(&entry("dead", 5, -10)).await.unwrap();
        tier.upsert(&entry("live", 5, 3600)).await.unwrap();

        assert_eq!(tier.reap(Utc::now()).await.unwrap(), 1);
        assert_eq!(tier.reap(Utc::now()).await.unwrap(), 0);
        assert_eq!(tier.count_valid(Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn capacity_sweep_removes_lowest_retention() {
        let tier = tier(10).await;
        let now = Utc::now();

        for i in 0..11 {
            let mut e = entry(&format!("k{i:02}"), if i == 0 { 1 } else { 8 }, 3600);
            e.last_accessed = now - chrono::Duration::minutes(if i == 0 { 60 } else { 1 });
            tier.upsert(&e).await.unwrap();
        }

        let evicted = tier.enforce_capacity("k10", now).await.unwrap();
        assert!(evicted.len() >= 2, "expected sweep below soft cap, evicted {}", evicted.len());
        assert!(evicted.contains(&"k00".to_string()));
        // The low-priority, stale entry goes first
        assert!(tier.get("k00", now).await.unwrap().is_none());
        // The protected key stays
        assert!(tier.get("k10", now).await.unwrap().is_some());
        assert!(tier.count_total().await.unwrap() <= 9);
    }
}
