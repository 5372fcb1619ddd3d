//! Context assembly for a single user turn.
//!
//! # Algorithm
//!
//! 1. Reserve the user turn's tokens (it is always included verbatim);
//!    fail with `UserTurnTooLarge` if nothing else could fit.
//! 2. Fetch the four raw inputs concurrently — recent dialogue, rolling
//!    summary, relevant artifacts, project facts — raced against the
//!    caller's cancellation token.
//! 3. Allocate per-layer caps over the remaining budget.
//! 4. Compose sections in priority order, truncating each layer to its cap:
//!    project (metadata dropped first), summary (truncated from the end),
//!    artifacts (lowest relevance dropped), recent dialogue (oldest turns
//!    dropped), then the user turn.
//!
//! Cache writes for the summary and artifact lookups are deferred until all
//! fetches succeed; a cancelled assembly writes nothing.

use crate::accountant::{self, Mode};
use crate::retry;
use crate::Orchestrator;
use base64::Engine as _;
use durandal_core::{
    CacheHints, ContextError, ContextPayload, ContextSection, KnowledgeArtifact, LmError, Message,
    PayloadMetadata, ProjectFacts, SectionKind, StoreError,
};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROJECT_PRIORITY: i64 = 4;
const SUMMARY_PRIORITY: i64 = 6;
const RECENT_PRIORITY: i64 = 8;
const USER_PRIORITY: i64 = 10;

const SUMMARY_MAX_TOKENS: u32 = 256;
const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_PROMPT: &str =
    "Summarize the following dialogue. Keep decisions, facts, constraints, and open questions.";

/// One assembly request.
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub session_id: String,
    pub project_id: String,
    pub user_turn: String,
    pub budget_tokens: usize,
    pub mode: Option<Mode>,
    pub cancel: CancellationToken,
}

impl AssembleRequest {
    pub fn new(
        session_id: impl Into<String>,
        project_id: impl Into<String>,
        user_turn: impl Into<String>,
        budget_tokens: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: project_id.into(),
            user_turn: user_turn.into(),
            budget_tokens,
            mode: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Short deterministic hash of a user turn, used as a cache key suffix:
/// base64 of sha256 of the lowercased text, first 32 chars.
pub fn fingerprint(user_turn: &str) -> String {
    let digest = Sha256::digest(user_turn.to_lowercase().as_bytes());
    let encoded = base64::engine::general_purpose::STANDARD.encode(digest);
    encoded.chars().take(32).collect()
}

/// A cache write deferred until the assembly is known to complete.
struct PendingPut {
    key: String,
    value: serde_json::Value,
    hints: CacheHints,
}

struct SummaryOutcome {
    summary: Option<String>,
    cache_hit: bool,
    skipped: bool,
    pending: Option<PendingPut>,
}

struct ArtifactOutcome {
    artifacts: Vec<KnowledgeArtifact>,
    cache_hit: bool,
    partial: bool,
    pending: Option<PendingPut>,
}

impl Orchestrator {
    /// Assemble a `ContextPayload` for one user turn.
    ///
    /// Degradations (no summary, partial artifacts, cold cache) are flagged
    /// in the payload metadata, never surfaced as errors; the assembly only
    /// fails when the user turn itself cannot fit, the dialogue/project
    /// fetches fail after retries, or the caller cancels.
    pub async fn assemble(&self, req: AssembleRequest) -> Result<ContextPayload, ContextError> {
        let started = Instant::now();
        if req.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        // A zero budget means "use the configured default".
        let budget_tokens = if req.budget_tokens == 0 {
            self.config.default_budget_tokens
        } else {
            req.budget_tokens
        };

        let user_content = format!("user: {}", req.user_turn);
        let user_tokens = accountant::estimate(&user_content);
        let floor = self.config.min_layer_tokens;
        if user_tokens + floor > budget_tokens {
            return Err(ContextError::UserTurnTooLarge {
                user_tokens,
                budget: budget_tokens,
                floor,
            });
        }

        let fetches = async {
            tokio::join!(
                retry::with_backoff(&retry::STORE_READ_BACKOFF, StoreError::is_transient, || {
                    self.store
                        .recent_messages(&req.session_id, self.config.recent_message_count)
                }),
                self.fetch_summary(&req.session_id),
                self.fetch_artifacts(&req.project_id, &req.user_turn),
                retry::with_backoff(&retry::STORE_READ_BACKOFF, StoreError::is_transient, || {
                    self.store.project_facts(&req.project_id)
                }),
            )
        };
        let (recent, summary, artifacts, facts) = tokio::select! {
            biased;
            _ = req.cancel.cancelled() => return Err(ContextError::Cancelled),
            results = fetches => results,
        };

        let recent = recent.map_err(|e| ContextError::StoreUnavailable(e.to_string()))?;
        let facts = facts.map_err(|e| ContextError::StoreUnavailable(e.to_string()))?;

        if req.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        // Every fetch succeeded: flush the deferred cache writes.
        for pending in [&summary.pending, &artifacts.pending].into_iter().flatten() {
            if let Err(e) = self
                .cache
                .put(&pending.key, pending.value.clone(), pending.hints.clone())
                .await
            {
                warn!(key = %pending.key, "Deferred cache write failed: {e}");
            }
        }

        let cache_hits = summary.cache_hit as u32 + artifacts.cache_hit as u32;
        let weights = req.mode.map(|m| m.weights()).unwrap_or_default();
        let effective_budget = budget_tokens - user_tokens;
        let budgets = accountant::allocate(effective_budget, &weights, floor);

        let mut sections = Vec::new();
        if let Some(section) = compose_project(&facts, budgets.project) {
            sections.push(section);
        }
        if let Some(section) = summary
            .summary
            .as_deref()
            .and_then(|text| compose_summary(text, budgets.summary))
        {
            sections.push(section);
        }
        sections.extend(compose_artifacts(&artifacts.artifacts, budgets.artifacts));
        if let Some(section) = compose_recent(&recent, budgets.recent_dialogue) {
            sections.push(section);
        }
        sections.push(ContextSection {
            kind: SectionKind::UserTurn,
            content: user_content,
            token_count: user_tokens,
            priority: USER_PRIORITY,
        });

        let total_tokens = sections.iter().map(|s| s.token_count).sum();
        debug!(
            total_tokens,
            budget = budget_tokens,
            sections = sections.len(),
            "Assembled context"
        );

        Ok(ContextPayload {
            sections,
            total_tokens,
            metadata: PayloadMetadata {
                cache_hits,
                latency_ms: started.elapsed().as_millis() as u64,
                summary_skipped: summary.skipped,
                artifacts_partial: artifacts.partial,
                cache_cold: cache_hits == 0,
            },
        })
    }

    /// The rolling-summary layer: cached when fresh, recomputed through the
    /// language model once the session outgrows the thresholds.
    ///
    /// The summarization window is `summary_threshold_messages` long — wider
    /// than the recent-dialogue layer, so the summary covers what the
    /// dialogue window no longer shows.
    async fn fetch_summary(&self, session_id: &str) -> SummaryOutcome {
        let none = |skipped: bool| SummaryOutcome {
            summary: None,
            cache_hit: false,
            skipped,
            pending: None,
        };

        let window = self.config.summary_threshold_messages;
        let scan = match retry::with_backoff(
            &retry::STORE_READ_BACKOFF,
            StoreError::is_transient,
            || self.store.recent_messages(session_id, window),
        )
        .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(session_id, "Summary scan failed: {e}");
                return none(true);
            }
        };

        let Some(last) = scan.last() else {
            return none(false);
        };

        let key = format!("summary:{}:{}", session_id, last.id);
        if let Some(value) = self.cache.get(&key).await {
            if let Some(text) = value.as_str() {
                return SummaryOutcome {
                    summary: Some(text.to_string()),
                    cache_hit: true,
                    skipped: false,
                    pending: None,
                };
            }
        }

        let scan_tokens: usize = scan.iter().map(|m| m.token_count).sum();
        if scan.len() < window && scan_tokens <= self.config.summary_trigger_tokens {
            return none(false);
        }

        let dialogue: String = scan
            .iter()
            .map(|m| m.render())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("{SUMMARY_PROMPT}\n\n{dialogue}");

        let completion = tokio::time::timeout(
            Duration::from_secs(self.config.lm_timeout_secs),
            retry::with_backoff(
                &retry::LM_BACKOFF,
                |e: &LmError| matches!(e, LmError::RateLimited { .. }),
                || {
                    self.language_model
                        .complete(&prompt, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE)
                },
            ),
        )
        .await;

        match completion {
            Ok(Ok(text)) => SummaryOutcome {
                summary: Some(text.clone()),
                cache_hit: false,
                skipped: false,
                pending: Some(PendingPut {
                    key,
                    value: serde_json::Value::String(text),
                    hints: CacheHints {
                        value_type: Some("summary".into()),
                        priority: Some(SUMMARY_PRIORITY),
                        ..CacheHints::default()
                    },
                }),
            },
            Ok(Err(e)) => {
                warn!(session_id, "Summary generation failed: {e}");
                none(true)
            }
            Err(_) => {
                warn!(
                    session_id,
                    timeout_secs = self.config.lm_timeout_secs,
                    "Summary generation timed out"
                );
                none(true)
            }
        }
    }

    /// The artifact layer: fingerprint-keyed retrieval cache in front of
    /// the store's ranked search.
    async fn fetch_artifacts(&self, project_id: &str, user_turn: &str) -> ArtifactOutcome {
        let key = format!("artifacts:{}:{}", project_id, fingerprint(user_turn));

        if let Some(value) = self.cache.get(&key).await {
            match serde_json::from_value::<Vec<KnowledgeArtifact>>(value) {
                Ok(artifacts) => {
                    return ArtifactOutcome {
                        artifacts,
                        cache_hit: true,
                        partial: false,
                        pending: None,
                    };
                }
                Err(e) => debug!(key = %key, "Stale artifact cache shape, refetching: {e}"),
            }
        }

        match retry::with_backoff(&retry::STORE_READ_BACKOFF, StoreError::is_transient, || {
            self.store
                .search_artifacts(project_id, user_turn, self.config.max_artifacts)
        })
        .await
        {
            Ok(artifacts) => {
                let pending = serde_json::to_value(&artifacts).ok().map(|value| PendingPut {
                    key,
                    value,
                    hints: CacheHints {
                        value_type: Some("retrieval".into()),
                        ttl: Some(chrono::Duration::minutes(30)),
                        ..CacheHints::default()
                    },
                });
                ArtifactOutcome {
                    artifacts,
                    cache_hit: false,
                    partial: false,
                    pending,
                }
            }
            Err(e) => {
                warn!(project_id, "Artifact search failed: {e}");
                ArtifactOutcome {
                    artifacts: Vec::new(),
                    cache_hit: false,
                    partial: true,
                    pending: None,
                }
            }
        }
    }
}

// ── Layer composition ─────────────────────────────────────────────────────

fn compose_project(facts: &ProjectFacts, cap: usize) -> Option<ContextSection> {
    if cap == 0 {
        return None;
    }
    let full = facts.render(true);
    let content = if accountant::estimate(&full) <= cap {
        full
    } else {
        // Metadata goes first; the name/description line is truncated last.
        truncate_to_tokens(&facts.render(false), cap)
    };
    if content.is_empty() {
        return None;
    }
    let token_count = accountant::estimate(&content);
    Some(ContextSection {
        kind: SectionKind::Project,
        content,
        token_count,
        priority: PROJECT_PRIORITY,
    })
}

fn compose_summary(text: &str, cap: usize) -> Option<ContextSection> {
    if cap == 0 || text.is_empty() {
        return None;
    }
    let content = truncate_to_tokens(&format!("[Conversation Summary]\n{text}"), cap);
    let token_count = accountant::estimate(&content);
    Some(ContextSection {
        kind: SectionKind::Summary,
        content,
        token_count,
        priority: SUMMARY_PRIORITY,
    })
}

/// One section per artifact, highest relevance first, until the cap is
/// reached; artifacts that do not fit are dropped, lowest relevance first.
fn compose_artifacts(artifacts: &[KnowledgeArtifact], cap: usize) -> Vec<ContextSection> {
    let mut sorted: Vec<&KnowledgeArtifact> = artifacts.iter().collect();
    sorted.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));

    let mut used = 0usize;
    let mut sections = Vec::new();
    for artifact in sorted {
        let body = artifact
            .content
            .summary
            .as_deref()
            .unwrap_or(&artifact.content.original);
        let content = format!("[{}] {}\n{}", artifact.artifact_type, artifact.name, body);
        let token_count = accountant::estimate(&content);
        if used + token_count <= cap {
            used += token_count;
            sections.push(ContextSection {
                kind: SectionKind::Artifact,
                content,
                token_count,
                priority: artifact.relevance_score,
            });
        }
    }
    sections
}

/// Sliding window over the dialogue: newest messages kept, oldest dropped.
fn compose_recent(messages: &[Message], cap: usize) -> Option<ContextSection> {
    if cap == 0 || messages.is_empty() {
        return None;
    }

    let mut used = 0usize;
    let mut lines: Vec<String> = Vec::new();
    for message in messages.iter().rev() {
        let line = message.render();
        let line_tokens = accountant::estimate(&line) + 1; // join allowance
        if used + line_tokens <= cap {
            used += line_tokens;
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let content = lines.join("\n");
    let token_count = accountant::estimate(&content);
    Some(ContextSection {
        kind: SectionKind::RecentDialogue,
        content,
        token_count,
        priority: RECENT_PRIORITY,
    })
}

/// Truncate text so its estimate fits within `cap` tokens. The estimator is
/// byte-based, so the cut is on a char boundary at or below `cap × 4` bytes.
fn truncate_to_tokens(text: &str, cap: usize) -> String {
    let max_bytes = cap * 4;
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
