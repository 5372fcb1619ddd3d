//! # Durandal Extractor
//!
//! Decides whether a text fragment (typically an assistant reply, sometimes
//! paired with the preceding user turn) encodes durable knowledge, and if so
//! produces a fully-populated artifact candidate: type, title, tags, score,
//! and confidence.
//!
//! `analyze` is infallible from the caller's perspective — internal failures
//! surface in `ExtractionResult.reason`, never as an `Err`.

pub mod patterns;
pub mod similarity;
pub mod title;

use durandal_config::EngineConfig;
use durandal_core::{ArtifactType, ExtractionError};
use patterns::{compile_groups, matched_technical_terms, word_tokens, PatternGroup, CATEGORY_ORDER};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Why an analysis ended the way it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionReason {
    /// The content cleared the threshold and should be stored.
    Extracted,
    /// Shorter than the minimum extractable length.
    ContentTooShort,
    /// Scored below the extraction threshold.
    BelowThreshold,
    /// Dropped by the duplicate check (set by the orchestrator).
    Duplicate,
    /// Scoring failed internally; the message is attached.
    AnalysisError(String),
}

/// The outcome of analyzing one fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub should_extract: bool,
    pub score: f64,
    pub confidence: f64,
    pub artifact_type: ArtifactType,
    pub suggested_title: String,
    pub tags: Vec<String>,
    /// Categories of the groups that matched, descending by match count.
    pub categories: Vec<String>,
    /// Names of the groups that matched.
    pub patterns_matched: Vec<String>,
    pub reason: ExtractionReason,
}

impl ExtractionResult {
    fn rejected(reason: ExtractionReason) -> Self {
        Self {
            should_extract: false,
            score: 0.0,
            confidence: 0.0,
            artifact_type: ArtifactType::General,
            suggested_title: String::new(),
            tags: Vec::new(),
            categories: Vec::new(),
            patterns_matched: Vec::new(),
            reason,
        }
    }

    /// The extraction analysis as a JSON blob for artifact content.
    pub fn analysis_json(&self) -> serde_json::Value {
        serde_json::json!({
            "score": self.score,
            "confidence": self.confidence,
            "patterns_matched": self.patterns_matched,
            "categories": self.categories,
            "reason": self.reason,
        })
    }
}

/// The knowledge extractor. Compile once, reuse for every turn.
pub struct KnowledgeExtractor {
    groups: Vec<PatternGroup>,
    extraction_threshold: f64,
    min_extractable_length: usize,
}

impl KnowledgeExtractor {
    /// Build an extractor from the engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            groups: compile_groups(),
            extraction_threshold: config.extraction_threshold,
            min_extractable_length: config.min_extractable_length,
        }
    }

    /// Build an extractor with default calibration.
    pub fn with_defaults() -> Self {
        Self::new(&EngineConfig::default())
    }

    /// Analyze one fragment. Never fails; see `ExtractionReason`.
    pub fn analyze(&self, content: &str, user_input: Option<&str>) -> ExtractionResult {
        if content.chars().count() < self.min_extractable_length {
            return ExtractionResult::rejected(ExtractionReason::ContentTooShort);
        }

        match self.score_content(content, user_input) {
            Ok(result) => result,
            Err(e) => {
                debug!("Extraction analysis failed: {e}");
                ExtractionResult::rejected(ExtractionReason::AnalysisError(e.to_string()))
            }
        }
    }

    fn score_content(
        &self,
        content: &str,
        user_input: Option<&str>,
    ) -> Result<ExtractionResult, ExtractionError> {
        // Pattern scan: each group contributes its weight at most once.
        let mut weight_sum = 0.0;
        let mut matched: Vec<(&PatternGroup, usize)> = Vec::new();
        for group in &self.groups {
            let count = group.match_count(content);
            if count > 0 {
                weight_sum += group.weight;
                matched.push((group, count));
            }
        }

        let terms = matched_technical_terms(content);
        let score = weight_sum + self.bonus_points(content, user_input, terms.len());
        let should_extract = score >= self.extraction_threshold;

        let artifact_type = categorize(&matched);
        let confidence =
            0.7 * (weight_sum / 10.0).min(1.0) + 0.3 * (score / 15.0).min(1.0);

        let mut by_count = matched.clone();
        by_count.sort_by(|a, b| b.1.cmp(&a.1));
        let categories: Vec<String> = by_count
            .iter()
            .map(|(g, _)| g.category.as_str().to_string())
            .collect();
        let patterns_matched: Vec<String> =
            matched.iter().map(|(g, _)| g.name.to_string()).collect();

        let suggested_title = title::suggest_title(content, user_input, artifact_type);
        let tags = self.build_tags(&patterns_matched, &terms, user_input);

        let reason = if should_extract {
            ExtractionReason::Extracted
        } else {
            ExtractionReason::BelowThreshold
        };

        Ok(ExtractionResult {
            should_extract,
            score,
            confidence: confidence.clamp(0.0, 1.0),
            artifact_type,
            suggested_title,
            tags,
            categories,
            patterns_matched,
            reason,
        })
    }

    fn bonus_points(&self, content: &str, user_input: Option<&str>, term_count: usize) -> f64 {
        let lower = content.to_lowercase();
        let mut bonus = 0.0;

        // Code block
        if content.contains("```") {
            bonus += 3.0;
        }

        // Substantial length
        if content.chars().count() > 150 {
            bonus += 1.0;
        }

        // Technical vocabulary, one point per distinct term, capped
        bonus += (term_count as f64).min(6.0);

        // Numbered steps
        if numbered_steps_re().is_match(content) {
            bonus += 2.0;
        }

        // Solution keywords
        if contains_any(&lower, &["solution", "solved", "fixed", "resolved", "works now"]) {
            bonus += 3.0;
        }

        // Error-resolution pairing
        let has_error = contains_any(&lower, &["error", "exception", "panic", "failure"]);
        let has_resolution = contains_any(&lower, &["fixed", "resolved", "caused by", "turned out"]);
        if has_error && has_resolution {
            bonus += 2.0;
        }

        // Multiple options offered
        if contains_any(&lower, &["alternatively", "another option", "another way", "or you can"]) {
            bonus += 1.0;
        }

        // Best-practice keywords
        if contains_any(&lower, &["best practice", "recommended", "idiomatic", "convention"]) {
            bonus += 2.0;
        }

        // Configuration keywords
        if contains_any(&lower, &["config", "environment variable", "setting", ".env", "flag"]) {
            bonus += 2.0;
        }

        // Relevance to the user's question
        if let Some(input) = user_input {
            let relevant = word_tokens(input)
                .into_iter()
                .filter(|t| t.chars().count() >= 4)
                .any(|t| lower.contains(&t));
            if relevant {
                bonus += 1.0;
            }
        }

        bonus
    }

    fn build_tags(
        &self,
        patterns_matched: &[String],
        terms: &[&'static str],
        user_input: Option<&str>,
    ) -> Vec<String> {
        // The literal tags come first so the cap never drops them.
        let mut tags: Vec<String> = vec!["auto_extracted".into(), "durandal_knowledge".into()];

        for name in patterns_matched {
            push_unique(&mut tags, name.clone());
        }
        for term in terms {
            push_unique(&mut tags, (*term).to_string());
        }
        if let Some(input) = user_input {
            for token in word_tokens(input) {
                if token.chars().count() >= 4
                    && patterns::TECHNICAL_TERMS.contains(&token.as_str())
                {
                    push_unique(&mut tags, token);
                }
            }
        }

        tags.truncate(10);
        tags
    }
}

/// The category with the highest per-group match count; ties break by the
/// fixed order in `CATEGORY_ORDER`. No matches at all means `General`.
fn categorize(matched: &[(&PatternGroup, usize)]) -> ArtifactType {
    let mut best = ArtifactType::General;
    let mut best_count = 0usize;
    for category in CATEGORY_ORDER {
        let count: usize = matched
            .iter()
            .filter(|(g, _)| g.category == category)
            .map(|(_, c)| *c)
            .sum();
        if count > best_count {
            best = category;
            best_count = count;
        }
    }
    best
}

fn numbered_steps_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s").expect("static pattern"))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn push_unique(tags: &mut Vec<String>, tag: String) {
    if !tags.contains(&tag) {
        tags.push(tag);
    }
}
