//! Pure scoring functions for admission, eviction, and relevance ranking.
//!
//! These have no object identity and no I/O; both tiers and the public
//! `Ramr` API call into them.

use chrono::{DateTime, Utc};
use durandal_core::CacheHints;

/// The admission decision for a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub should_cache: bool,
    pub priority: i64,
}

/// Markers that tag a serialized value as code-bearing.
const CODE_MARKERS: [&str; 4] = ["```", "fn ", "function ", "class "];

/// Score how worth caching a value is.
///
/// Starts from the caller's hinted priority (default 5), adjusts for value
/// type, code content, and size, clamps to `[1, 10]`. Values below priority
/// 4 are not cached.
pub fn cache_worthiness(hints: &CacheHints, value_preview: &str, size_bytes: i64) -> Admission {
    let mut priority = hints.priority.unwrap_or(5);
    let value_type = hints.value_type.as_deref();

    let looks_like_code = CODE_MARKERS.iter().any(|m| value_preview.contains(m));
    if looks_like_code || matches!(value_type, Some("code") | Some("solution")) {
        priority += 2;
    }
    if matches!(value_type, Some("solution") | Some("configuration")) {
        priority += 1;
    }
    if size_bytes > 1024 {
        priority += 1;
    }
    if value_type == Some("casual") {
        priority -= 2;
    }

    let priority = priority.clamp(1, 10);
    Admission {
        should_cache: priority >= 4,
        priority,
    }
}

/// How much an entry deserves to stay resident: `0.6·(priority/10) +
/// 0.4·recency`, where recency is 1 for the most recently touched entry in
/// the candidate set and 0 for the oldest. The entry with the lowest
/// retention is evicted first.
pub fn retention_score(
    priority: i64,
    last_accessed: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age_ms: i64,
) -> f64 {
    let age_ms = (now - last_accessed).num_milliseconds().max(0);
    let recency = if max_age_ms <= 0 {
        1.0
    } else {
        1.0 - (age_ms as f64 / max_age_ms as f64).clamp(0.0, 1.0)
    };
    0.6 * (priority as f64 / 10.0) + 0.4 * recency
}

/// Relevance of a cached entry to a query:
/// `0.5·lexical_overlap + 0.3·(priority/10) + 0.2·recency_decay`.
pub fn relevance_score(
    query_tokens: &[String],
    entry_text: &str,
    priority: i64,
    last_accessed: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let overlap = lexical_overlap(query_tokens, entry_text);
    let age_hours = ((now - last_accessed).num_seconds().max(0) as f64) / 3600.0;
    let decay = 1.0 / (1.0 + age_hours);
    0.5 * overlap + 0.3 * (priority as f64 / 10.0) + 0.2 * decay
}

/// Fraction of query tokens appearing in the entry text, in `[0, 1]`.
fn lexical_overlap(query_tokens: &[String], entry_text: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let entry_lower = entry_text.to_lowercase();
    let hits = query_tokens
        .iter()
        .filter(|t| entry_lower.contains(t.as_str()))
        .count();
    hits as f64 / query_tokens.len() as f64
}

/// Lowercase word tokens of a query string.
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(value_type: Option<&str>, priority: Option<i64>) -> CacheHints {
        CacheHints {
            value_type: value_type.map(String::from),
            priority,
            ..CacheHints::default()
        }
    }

    #[test]
    fn default_priority_admits() {
        let admission = cache_worthiness(&hints(None, None), "plain text", 100);
        assert_eq!(admission.priority, 5);
        assert!(admission.should_cache);
    }

    #[test]
    fn solution_type_boosts_by_three() {
        let admission = cache_worthiness(&hints(Some("solution"), None), "text", 100);
        assert_eq!(admission.priority, 8); // 5 + 2 (solution) + 1 (solution|configuration)
    }

    #[test]
    fn code_markers_boost() {
        let admission = cache_worthiness(&hints(None, None), "```rust\nfn x() {}\n```", 100);
        assert_eq!(admission.priority, 7);
    }

    #[test]
    fn casual_type_can_fall_below_admission() {
        let admission = cache_worthiness(&hints(Some("casual"), None), "hi there", 20);
        assert_eq!(admission.priority, 3);
        assert!(!admission.should_cache);
    }

    #[test]
    fn large_value_boosts() {
        let admission = cache_worthiness(&hints(None, None), "text", 4096);
        assert_eq!(admission.priority, 6);
    }

    #[test]
    fn priority_is_clamped_to_ten() {
        let admission =
            cache_worthiness(&hints(Some("solution"), Some(9)), "```code```", 4096);
        assert_eq!(admission.priority, 10);
    }

    #[test]
    fn retention_prefers_high_priority_and_recent() {
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(10);
        let max_age = 10 * 60 * 1000;

        let high_recent = retention_score(9, now, now, max_age);
        let low_recent = retention_score(5, now, now, max_age);
        let low_old = retention_score(5, old, now, max_age);

        assert!(high_recent > low_recent);
        assert!(low_recent > low_old);
    }

    #[test]
    fn overlap_is_fraction_of_query() {
        let tokens = query_tokens("cache eviction policy");
        assert_eq!(lexical_overlap(&tokens, "the EVICTION policy doc"), 2.0 / 3.0);
        assert_eq!(lexical_overlap(&tokens, "nothing related"), 0.0);
    }

    #[test]
    fn relevance_blends_components() {
        let now = Utc::now();
        let tokens = query_tokens("retry backoff");
        let relevant = relevance_score(&tokens, "retry with backoff", 5, now, now);
        let irrelevant = relevance_score(&tokens, "unrelated entry", 5, now, now);
        assert!(relevant > irrelevant);
        // Full overlap + priority 5 + fresh: 0.5 + 0.15 + 0.2
        assert!((relevant - 0.85).abs() < 1e-9);
    }
}
