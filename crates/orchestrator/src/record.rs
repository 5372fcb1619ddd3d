//! Post-turn recording: persist the exchange, extract knowledge, warm the
//! cache, and close sessions.

use crate::Orchestrator;
use durandal_core::{
    ArtifactContent, CacheHints, KnowledgeArtifact, Message, RecordError, StoreError,
};
use durandal_extractor::{similarity, ExtractionReason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many trailing messages a session-close snapshot captures.
const SNAPSHOT_MESSAGES: usize = 50;

/// Window within which auto-extracted artifacts deduplicate.
const DEDUP_WINDOW_DAYS: i64 = 7;

/// One turn to record.
#[derive(Debug, Clone)]
pub struct RecordTurnRequest {
    pub session_id: String,
    pub user_turn: String,
    pub assistant_reply: String,
    pub cancel: CancellationToken,
}

impl RecordTurnRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_turn: impl Into<String>,
        assistant_reply: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_turn: user_turn.into(),
            assistant_reply: assistant_reply.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What `record_turn` did.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// IDs of the persisted user and assistant messages, in that order.
    pub message_ids: Vec<String>,

    /// The stored artifact, when extraction produced one.
    pub artifact: Option<KnowledgeArtifact>,

    /// Why extraction did or did not produce an artifact.
    pub extraction: ExtractionReason,
}

impl Orchestrator {
    /// Record one completed turn.
    ///
    /// Message persistence failures surface as `RecordError`; extraction
    /// and cache-warming failures are logged and swallowed. Not idempotent
    /// on messages (repeats append again) but idempotent on artifacts: the
    /// similarity dedup drops repeats inside the 7-day window.
    ///
    /// Cancellation after the messages commit returns
    /// `RecordError::Cancelled` with the messages left in place; the
    /// extraction and cache-warming steps are skipped. The retrieval-cache
    /// prefix for the project is invalidated eagerly after a new artifact
    /// lands rather than waiting out its TTL.
    pub async fn record_turn(&self, req: RecordTurnRequest) -> Result<RecordOutcome, RecordError> {
        let user = Message::user(&req.session_id, &req.user_turn);
        let assistant = Message::assistant(&req.session_id, &req.assistant_reply);
        let message_ids = self
            .store
            .append_messages(&req.session_id, vec![user, assistant])
            .await?;

        if req.cancel.is_cancelled() {
            debug!(session_id = %req.session_id, "Turn cancelled after commit, skipping extraction");
            return Err(RecordError::Cancelled);
        }

        let analysis = self
            .extractor
            .analyze(&req.assistant_reply, Some(&req.user_turn));
        if !analysis.should_extract {
            return Ok(RecordOutcome {
                message_ids,
                artifact: None,
                extraction: analysis.reason,
            });
        }

        let project_id = match self.store.get_session(&req.session_id).await {
            Ok(session) => session.project_id,
            Err(e) => {
                warn!(session_id = %req.session_id, "Cannot resolve owning project, skipping artifact: {e}");
                return Ok(RecordOutcome {
                    message_ids,
                    artifact: None,
                    extraction: analysis.reason,
                });
            }
        };

        // Dedup against recent auto-extracted artifacts.
        let prefix = similarity::content_prefix(&req.assistant_reply);
        let candidates = match self
            .store
            .find_similar_artifacts(
                &project_id,
                &analysis.suggested_title,
                &prefix,
                chrono::Duration::days(DEDUP_WINDOW_DAYS),
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(%project_id, "Dedup scan failed, proceeding without it: {e}");
                Vec::new()
            }
        };
        if candidates
            .iter()
            .any(|c| similarity::is_duplicate_of(&analysis.suggested_title, &req.assistant_reply, c))
        {
            debug!(title = %analysis.suggested_title, "Duplicate artifact dropped");
            return Ok(RecordOutcome {
                message_ids,
                artifact: None,
                extraction: ExtractionReason::Duplicate,
            });
        }

        let mut artifact = KnowledgeArtifact::auto(
            &project_id,
            analysis.artifact_type,
            &analysis.suggested_title,
            ArtifactContent {
                original: req.assistant_reply.clone(),
                analysis: Some(analysis.analysis_json()),
                summary: None,
                extra: serde_json::Map::new(),
            },
        )
        .with_tags(analysis.tags.clone())
        .with_relevance(analysis.score.round() as i64);
        artifact.extraction_confidence = analysis.confidence;
        artifact.source_message_id = message_ids.get(1).cloned();

        let stored = self.store.put_artifact(artifact).await?;
        debug!(artifact_id = %stored.id, type_ = %stored.artifact_type, "Extracted artifact");

        // Best-effort cache warm and retrieval invalidation.
        let cache_key = format!("artifact:{}:{}", project_id, stored.id);
        match serde_json::to_value(&stored) {
            Ok(value) => {
                let hints = CacheHints {
                    value_type: Some(stored.artifact_type.as_str().into()),
                    priority: Some(stored.relevance_score),
                    ..CacheHints::default()
                };
                if let Err(e) = self.cache.put(&cache_key, value, hints).await {
                    warn!(key = %cache_key, "Artifact cache warm failed: {e}");
                }
            }
            Err(e) => warn!(key = %cache_key, "Artifact serialization for cache failed: {e}"),
        }
        if let Err(e) = self
            .cache
            .invalidate_prefix(&format!("artifacts:{}:", project_id))
            .await
        {
            warn!(%project_id, "Retrieval cache invalidation failed: {e}");
        }

        Ok(RecordOutcome {
            message_ids,
            artifact: Some(stored),
            extraction: ExtractionReason::Extracted,
        })
    }

    /// Close a session: snapshot the trailing dialogue as the context dump,
    /// attach the cached rolling summary when one exists, and record the
    /// session's token usage.
    pub async fn end_session(&self, session_id: &str) -> Result<(), StoreError> {
        let messages = self
            .store
            .recent_messages(session_id, SNAPSHOT_MESSAGES)
            .await?;
        let tokens_used: i64 = messages.iter().map(|m| m.token_count as i64).sum();

        let summary = match messages.last() {
            Some(last) => self
                .cache
                .get(&format!("summary:{session_id}:{}", last.id))
                .await
                .and_then(|v| v.as_str().map(String::from)),
            None => None,
        };

        let context_dump = serde_json::json!({
            "messages": messages,
            "message_count": messages.len(),
            "summary": summary,
        });

        self.store
            .end_session(session_id, context_dump, summary, tokens_used)
            .await
    }
}
