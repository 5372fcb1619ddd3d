//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use durandal_core::{
    DocumentStore, KnowledgeArtifact, Message, Project, ProjectFacts, Session, StoreError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    projects: Vec<Project>,
    sessions: HashMap<String, Session>,
    session_dumps: HashMap<String, serde_json::Value>,
    messages: Vec<Message>,
    artifacts: Vec<KnowledgeArtifact>,
}

/// An in-memory store backed by plain vectors and maps.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a project's metadata bag (test convenience).
    pub async fn set_project_metadata(
        &self,
        project_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(project) = inner.projects.iter_mut().find(|p| p.id == project_id) {
            project.metadata = metadata;
        }
    }

    /// The stored context dump of a closed session (test convenience).
    pub async fn context_dump(&self, session_id: &str) -> Option<serde_json::Value> {
        self.inner.read().await.session_dumps.get(session_id).cloned()
    }

    /// Total stored artifact count (test convenience).
    pub async fn artifact_count(&self) -> usize {
        self.inner.read().await.artifacts.len()
    }

    /// Total stored message count (test convenience).
    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_or_create_project(&self, name: &str) -> Result<Project, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(project) = inner.projects.iter().find(|p| p.name == name) {
            return Ok(project.clone());
        }
        let project = Project::new(name);
        inner.projects.push(project.clone());
        Ok(project)
    }

    async fn start_session(
        &self,
        project_id: &str,
        name: Option<String>,
    ) -> Result<Session, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.projects.iter().any(|p| p.id == project_id) {
            return Err(StoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            });
        }
        let session = Session::start(project_id, name);
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        self.inner
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })
    }

    async fn end_session(
        &self,
        session_id: &str,
        context_dump: serde_json::Value,
        _summary: Option<String>,
        tokens_used: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?;
        session.ended_at = Some(Utc::now());
        session.token_usage = tokens_used;
        inner.session_dumps.insert(session_id.to_string(), context_dump);
        Ok(())
    }

    async fn append_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut ids = Vec::with_capacity(messages.len());
        for mut message in messages {
            if message.id.is_empty() {
                message.id = Uuid::new_v4().to_string();
            }
            message.session_id = session_id.to_string();
            ids.push(message.id.clone());
            inner.messages.push(message);
        }
        Ok(ids)
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let session_messages: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .collect();
        let start = session_messages.len().saturating_sub(n);
        Ok(session_messages[start..].iter().map(|m| (*m).clone()).collect())
    }

    async fn search_artifacts(
        &self,
        project_id: &str,
        query: &str,
        max: usize,
    ) -> Result<Vec<KnowledgeArtifact>, StoreError> {
        let inner = self.inner.read().await;
        let query_lower = query.to_lowercase();
        let tokens: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<(f64, KnowledgeArtifact)> = inner
            .artifacts
            .iter()
            .filter(|a| a.project_id == project_id)
            .filter_map(|a| {
                let haystack = format!(
                    "{} {} {}",
                    a.name.to_lowercase(),
                    a.content.original.to_lowercase(),
                    a.tags.join(" ").to_lowercase()
                );
                let hits = tokens.iter().filter(|t| haystack.contains(**t)).count();
                if tokens.is_empty() {
                    Some((a.relevance_score as f64, a.clone()))
                } else if hits > 0 {
                    Some((hits as f64 * 10.0 + a.relevance_score as f64, a.clone()))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(max).map(|(_, a)| a).collect())
    }

    async fn find_similar_artifacts(
        &self,
        project_id: &str,
        _title: &str,
        _content_prefix: &str,
        window: chrono::Duration,
    ) -> Result<Vec<KnowledgeArtifact>, StoreError> {
        let cutoff = Utc::now() - window;
        let inner = self.inner.read().await;
        Ok(inner
            .artifacts
            .iter()
            .filter(|a| a.project_id == project_id && a.auto_generated && a.created_at >= cutoff)
            .cloned()
            .collect())
    }

    async fn put_artifact(
        &self,
        mut artifact: KnowledgeArtifact,
    ) -> Result<KnowledgeArtifact, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        artifact.updated_at = now;

        if artifact.artifact_type == durandal_core::ArtifactType::SystemConfig {
            if let Some(existing) = inner.artifacts.iter_mut().find(|a| {
                a.project_id == artifact.project_id
                    && a.name == artifact.name
                    && a.artifact_type == durandal_core::ArtifactType::SystemConfig
            }) {
                existing.content = artifact.content.clone();
                existing.updated_at = now;
                return Ok(existing.clone());
            }
        }

        if artifact.id.is_empty() {
            artifact.id = Uuid::new_v4().to_string();
        }
        artifact.created_at = now;
        inner.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn project_facts(&self, project_id: &str) -> Result<ProjectFacts, StoreError> {
        let inner = self.inner.read().await;
        let project = inner
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            })?;

        let description = project
            .metadata
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(ProjectFacts {
            name: project.name.clone(),
            description,
            metadata: project.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durandal_core::{ArtifactContent, ArtifactType};

    fn artifact(project_id: &str, name: &str, original: &str) -> KnowledgeArtifact {
        KnowledgeArtifact::auto(
            project_id,
            ArtifactType::Solution,
            name,
            ArtifactContent {
                original: original.into(),
                ..ArtifactContent::default()
            },
        )
    }

    #[tokio::test]
    async fn project_roundtrip() {
        let store = InMemoryStore::new();
        let first = store.get_or_create_project("demo").await.unwrap();
        let second = store.get_or_create_project("demo").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn session_for_unknown_project_fails() {
        let store = InMemoryStore::new();
        let err = store.start_session("ghost", None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn messages_most_recent_last() {
        let store = InMemoryStore::new();
        let project = store.get_or_create_project("demo").await.unwrap();
        let session = store.start_session(&project.id, None).await.unwrap();

        for i in 0..10 {
            store
                .append_messages(&session.id, vec![Message::user(&session.id, format!("m{i}"))])
                .await
                .unwrap();
        }

        let recent = store.recent_messages(&session.id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].content, "m9");
        assert_eq!(recent[0].content, "m7");
    }

    #[tokio::test]
    async fn search_matches_name_content_and_tags() {
        let store = InMemoryStore::new();
        let project = store.get_or_create_project("demo").await.unwrap();

        store
            .put_artifact(
                artifact(&project.id, "eviction notes", "retention scoring details")
                    .with_tags(vec!["cache".into()]),
            )
            .await
            .unwrap();
        store
            .put_artifact(artifact(&project.id, "unrelated", "gardening tips"))
            .await
            .unwrap();

        let by_name = store.search_artifacts(&project.id, "eviction", 5).await.unwrap();
        assert_eq!(by_name.len(), 1);
        let by_tag = store.search_artifacts(&project.id, "cache", 5).await.unwrap();
        assert_eq!(by_tag.len(), 1);
    }

    #[tokio::test]
    async fn end_session_stores_dump() {
        let store = InMemoryStore::new();
        let project = store.get_or_create_project("demo").await.unwrap();
        let session = store.start_session(&project.id, None).await.unwrap();

        store
            .end_session(&session.id, serde_json::json!({"messages": 2}), None, 7)
            .await
            .unwrap();

        let closed = store.get_session(&session.id).await.unwrap();
        assert!(!closed.is_open());
        assert_eq!(closed.token_usage, 7);
        assert_eq!(
            store.context_dump(&session.id).await.unwrap()["messages"],
            serde_json::json!(2)
        );
    }

    #[tokio::test]
    async fn system_config_updates_in_place() {
        let store = InMemoryStore::new();
        let project = store.get_or_create_project("demo").await.unwrap();

        let mut config = artifact(&project.id, "settings", "v1");
        config.artifact_type = ArtifactType::SystemConfig;
        let first = store.put_artifact(config.clone()).await.unwrap();

        config.content.original = "v2".into();
        let second = store.put_artifact(config).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.artifact_count().await, 1);
    }
}
