//! Duplicate detection for incoming artifact candidates.
//!
//! The store supplies recent candidates (`find_similar_artifacts`); these
//! helpers decide whether the incoming candidate is a duplicate of any of
//! them. Duplicates are dropped silently by the orchestrator.

use crate::patterns::word_tokens;
use durandal_core::KnowledgeArtifact;
use std::collections::HashSet;

/// Title similarity above which an auto-generated artifact is a duplicate.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Length of the content prefix used for containment checks.
pub const CONTENT_PREFIX_CHARS: usize = 100;

/// Token Dice coefficient over case-folded word sets, in `[0, 1]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = word_tokens(a).into_iter().collect();
    let set_b: HashSet<String> = word_tokens(b).into_iter().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let common = set_a.intersection(&set_b).count();
    (2.0 * common as f64) / (set_a.len() + set_b.len()) as f64
}

/// The first `CONTENT_PREFIX_CHARS` chars of a content string.
pub fn content_prefix(content: &str) -> String {
    content.chars().take(CONTENT_PREFIX_CHARS).collect()
}

/// Whether an incoming `(title, content)` duplicates an existing artifact:
/// either the titles are near-identical on an auto-generated artifact, or
/// the existing artifact's original content contains the incoming prefix.
pub fn is_duplicate_of(title: &str, content: &str, existing: &KnowledgeArtifact) -> bool {
    if existing.auto_generated
        && title_similarity(title, &existing.name) > TITLE_SIMILARITY_THRESHOLD
    {
        return true;
    }
    let prefix = content_prefix(content);
    !prefix.is_empty() && existing.content.original.contains(&prefix)
}
