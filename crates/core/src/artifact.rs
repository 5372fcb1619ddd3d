//! Knowledge artifact domain types.
//!
//! An artifact is a durable, typed, tagged piece of knowledge extracted from
//! a dialogue turn (or registered manually). Artifacts are owned by the
//! document store; the cache may hold serialized copies but never the
//! authoritative one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The type of knowledge an artifact encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Solution,
    Explanation,
    Recommendation,
    Configuration,
    Procedure,
    Code,
    Debugging,
    ImportantNote,
    General,
    /// Engine-owned configuration artifacts. The only type with a
    /// `(project_id, name)` uniqueness guarantee.
    SystemConfig,
}

impl ArtifactType {
    /// The stable string form used in storage and cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Solution => "solution",
            ArtifactType::Explanation => "explanation",
            ArtifactType::Recommendation => "recommendation",
            ArtifactType::Configuration => "configuration",
            ArtifactType::Procedure => "procedure",
            ArtifactType::Code => "code",
            ArtifactType::Debugging => "debugging",
            ArtifactType::ImportantNote => "important_note",
            ArtifactType::General => "general",
            ArtifactType::SystemConfig => "system_config",
        }
    }

    /// Parse the storage string form. Unknown values map to `General`.
    pub fn parse(s: &str) -> Self {
        match s {
            "solution" => ArtifactType::Solution,
            "explanation" => ArtifactType::Explanation,
            "recommendation" => ArtifactType::Recommendation,
            "configuration" => ArtifactType::Configuration,
            "procedure" => ArtifactType::Procedure,
            "code" => ArtifactType::Code,
            "debugging" => ArtifactType::Debugging,
            "important_note" => ArtifactType::ImportantNote,
            "system_config" => ArtifactType::SystemConfig,
            _ => ArtifactType::General,
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an artifact came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Manual,
    Automatic,
}

/// The structured content blob of an artifact.
///
/// Unknown fields are preserved on round-trip so older engines can carry
/// content written by newer ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactContent {
    /// The original source text the artifact was extracted from.
    pub original: String,

    /// Extraction analysis (score, confidence, matched patterns).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,

    /// Optional condensed summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Forward-compatibility: fields this version does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A durable, typed, tagged piece of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeArtifact {
    /// Unique artifact ID. Empty until the store assigns one.
    #[serde(default)]
    pub id: String,

    /// The owning project.
    pub project_id: String,

    /// The artifact type.
    pub artifact_type: ArtifactType,

    /// Title.
    pub name: String,

    /// Structured content blob.
    pub content: ArtifactContent,

    /// Categorization tags (set semantics; deduplicated on construction).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Free-form metadata bag.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Relevance score in `[1, 10]`.
    pub relevance_score: i64,

    /// How the artifact was produced.
    pub extraction_method: ExtractionMethod,

    /// Extraction confidence in `[0, 1]`.
    pub extraction_confidence: f64,

    /// Whether the engine produced this artifact without human action.
    pub auto_generated: bool,

    /// The message the artifact was extracted from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,

    /// When the artifact was first stored. Set by the store.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the artifact was last updated. Set by the store.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeArtifact {
    /// Create an auto-extracted artifact candidate, id left for the store.
    pub fn auto(
        project_id: impl Into<String>,
        artifact_type: ArtifactType,
        name: impl Into<String>,
        content: ArtifactContent,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            project_id: project_id.into(),
            artifact_type,
            name: name.into(),
            content,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            relevance_score: 5,
            extraction_method: ExtractionMethod::Automatic,
            extraction_confidence: 0.0,
            auto_generated: true,
            source_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach tags, deduplicating while preserving first-seen order.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.tags = tags
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        self
    }

    /// Clamp and set the relevance score.
    pub fn with_relevance(mut self, score: i64) -> Self {
        self.relevance_score = score.clamp(1, 10);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_string_roundtrip() {
        for ty in [
            ArtifactType::Solution,
            ArtifactType::Configuration,
            ArtifactType::ImportantNote,
            ArtifactType::SystemConfig,
        ] {
            assert_eq!(ArtifactType::parse(ty.as_str()), ty);
        }
    }

    #[test]
    fn unknown_type_maps_to_general() {
        assert_eq!(ArtifactType::parse("weird"), ArtifactType::General);
    }

    #[test]
    fn tags_deduplicate() {
        let artifact = KnowledgeArtifact::auto(
            "proj_1",
            ArtifactType::Solution,
            "a fix",
            ArtifactContent::default(),
        )
        .with_tags(vec!["rust".into(), "cache".into(), "rust".into()]);
        assert_eq!(artifact.tags, vec!["rust", "cache"]);
    }

    #[test]
    fn relevance_is_clamped() {
        let artifact = KnowledgeArtifact::auto(
            "proj_1",
            ArtifactType::General,
            "n",
            ArtifactContent::default(),
        )
        .with_relevance(42);
        assert_eq!(artifact.relevance_score, 10);
    }

    #[test]
    fn content_preserves_unknown_fields() {
        let json = serde_json::json!({
            "original": "the source text",
            "summary": "short",
            "future_field": {"nested": true}
        });
        let content: ArtifactContent = serde_json::from_value(json).unwrap();
        let back = serde_json::to_value(&content).unwrap();
        assert_eq!(back["future_field"]["nested"], serde_json::json!(true));
    }
}
