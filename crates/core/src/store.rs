//! DocumentStore trait — the durable storage capability.
//!
//! The engine never speaks SQL itself; it consumes this trait. Projects,
//! sessions, messages, and artifacts are owned by the store. All methods are
//! fallible and must be safe for concurrent reads — the orchestrator's
//! parallel fetches share one handle.

use crate::artifact::KnowledgeArtifact;
use crate::error::StoreError;
use crate::message::Message;
use crate::project::{Project, ProjectFacts, Session};
use async_trait::async_trait;

/// The durable document store capability.
///
/// Implementations: SQLite (production), in-memory (tests).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Look up a project by name, creating it when absent.
    async fn get_or_create_project(&self, name: &str) -> Result<Project, StoreError>;

    /// Open a new session for a project.
    async fn start_session(
        &self,
        project_id: &str,
        name: Option<String>,
    ) -> Result<Session, StoreError>;

    /// Fetch a session by ID.
    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError>;

    /// Close a session, storing its context snapshot and final counters.
    async fn end_session(
        &self,
        session_id: &str,
        context_dump: serde_json::Value,
        summary: Option<String>,
        tokens_used: i64,
    ) -> Result<(), StoreError>;

    /// Append messages to a session in call order. Returns the stored IDs.
    ///
    /// Within a session this is strictly ordered by call sequence: reads
    /// observe messages in insertion order.
    async fn append_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<String>, StoreError>;

    /// The `n` most recent messages of a session, most-recent last.
    async fn recent_messages(
        &self,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Search a project's artifacts, descending by relevance.
    async fn search_artifacts(
        &self,
        project_id: &str,
        query: &str,
        max: usize,
    ) -> Result<Vec<KnowledgeArtifact>, StoreError>;

    /// Auto-generated artifacts created within `window` that are candidate
    /// duplicates of `(title, content_prefix)`. Used by extraction dedup.
    async fn find_similar_artifacts(
        &self,
        project_id: &str,
        title: &str,
        content_prefix: &str,
        window: chrono::Duration,
    ) -> Result<Vec<KnowledgeArtifact>, StoreError>;

    /// Store an artifact. Returns the stored version with `id`,
    /// `created_at`, and `updated_at` populated.
    async fn put_artifact(
        &self,
        artifact: KnowledgeArtifact,
    ) -> Result<KnowledgeArtifact, StoreError>;

    /// The project facts layer for context assembly.
    async fn project_facts(&self, project_id: &str) -> Result<ProjectFacts, StoreError>;
}
