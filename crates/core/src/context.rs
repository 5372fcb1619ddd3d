//! Assembled context payload types.
//!
//! A `ContextPayload` is what the orchestrator hands back for one user turn:
//! an ordered list of sections whose token counts sum to at most the
//! caller's budget, the user turn always last.

use serde::{Deserialize, Serialize};

/// The kind of a context section, in compose order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Project,
    Summary,
    Artifact,
    RecentDialogue,
    UserTurn,
}

/// One layer of an assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    pub kind: SectionKind,
    pub content: String,
    pub token_count: usize,
    pub priority: i64,
}

/// Degradation and bookkeeping flags for an assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadMetadata {
    /// Cache hits observed during assembly (summary + artifact lookups).
    pub cache_hits: u32,

    /// Wall-clock assembly latency.
    pub latency_ms: u64,

    /// The summary layer was skipped (below threshold, LM failure, or
    /// timeout).
    pub summary_skipped: bool,

    /// The artifact layer is incomplete (store search failed after retries).
    pub artifacts_partial: bool,

    /// Neither the summary nor the artifact lookup hit the cache.
    pub cache_cold: bool,
}

/// The assembled context for one user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPayload {
    /// Ordered sections; the last is always the user turn.
    pub sections: Vec<ContextSection>,

    /// Sum of all section token counts. Never exceeds the budget.
    pub total_tokens: usize,

    /// Degradation flags and timings.
    pub metadata: PayloadMetadata,
}

impl ContextPayload {
    /// Render all sections as one prompt-ready text block.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The sections of a given kind.
    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &ContextSection> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }
}
