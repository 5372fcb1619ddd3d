//! SQLite document store with FTS5 artifact search.
//!
//! Four tables — `projects`, `sessions`, `messages`, `knowledge_artifacts` —
//! plus an external-content FTS5 index over artifact name/content/tags for
//! BM25-ranked search. Triggers keep the FTS index in sync.
//!
//! `(project_id, name)` is unique only for `system_config` artifacts,
//! enforced with a partial unique index; other artifact types rely on the
//! extractor's similarity dedup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use durandal_core::{
    ArtifactContent, ArtifactType, DocumentStore, ExtractionMethod, KnowledgeArtifact, Message,
    Project, ProjectFacts, Role, Session, StoreError,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A production SQLite document store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store from a file path.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Io(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // An in-memory database exists per connection; pooling past one
        // connection would shard it.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite document store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id         TEXT PRIMARY KEY,
                name       TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL,
                metadata   TEXT NOT NULL DEFAULT '{}'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id           TEXT PRIMARY KEY,
                project_id   TEXT NOT NULL REFERENCES projects(id),
                name         TEXT NOT NULL,
                started_at   TEXT NOT NULL,
                ended_at     TEXT,
                token_usage  INTEGER NOT NULL DEFAULT 0,
                context_dump TEXT,
                summary      TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT UNIQUE NOT NULL,
                session_id  TEXT NOT NULL REFERENCES sessions(id),
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, iid)",
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_artifacts (
                iid                   INTEGER PRIMARY KEY AUTOINCREMENT,
                id                    TEXT UNIQUE NOT NULL,
                project_id            TEXT NOT NULL REFERENCES projects(id),
                artifact_type         TEXT NOT NULL,
                name                  TEXT NOT NULL,
                content               TEXT NOT NULL,
                tags                  TEXT NOT NULL DEFAULT '[]',
                metadata              TEXT NOT NULL DEFAULT '{}',
                relevance_score       INTEGER NOT NULL DEFAULT 5,
                extraction_method     TEXT NOT NULL DEFAULT 'automatic',
                extraction_confidence REAL NOT NULL DEFAULT 0.0,
                auto_generated        INTEGER NOT NULL DEFAULT 0,
                source_message_id     TEXT,
                created_at            TEXT NOT NULL,
                updated_at            TEXT NOT NULL
            )
            "#,
            // (project_id, name) is unique only for system_config artifacts
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_artifacts_config_name
                ON knowledge_artifacts(project_id, name)
                WHERE artifact_type = 'system_config'
            "#,
            "CREATE INDEX IF NOT EXISTS idx_artifacts_project \
             ON knowledge_artifacts(project_id, iid DESC)",
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS artifacts_fts USING fts5(
                name,
                content,
                tags,
                content='knowledge_artifacts',
                content_rowid='iid',
                tokenize='porter unicode61'
            )
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS artifacts_ai AFTER INSERT ON knowledge_artifacts BEGIN
                INSERT INTO artifacts_fts(rowid, name, content, tags)
                VALUES (new.iid, new.name, new.content, new.tags);
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS artifacts_ad AFTER DELETE ON knowledge_artifacts BEGIN
                INSERT INTO artifacts_fts(artifacts_fts, rowid, name, content, tags)
                VALUES ('delete', old.iid, old.name, old.content, old.tags);
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS artifacts_au AFTER UPDATE ON knowledge_artifacts BEGIN
                INSERT INTO artifacts_fts(artifacts_fts, rowid, name, content, tags)
                VALUES ('delete', old.iid, old.name, old.content, old.tags);
                INSERT INTO artifacts_fts(rowid, name, content, tags)
                VALUES (new.iid, new.name, new.content, new.tags);
            END
            "#,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Io(format!("migration: {e}")))?;
        }

        debug!("Document store migrations complete");
        Ok(())
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
        Ok(Session {
            id: get_text(row, "id")?,
            project_id: get_text(row, "project_id")?,
            name: get_text(row, "name")?,
            started_at: parse_instant(&get_text(row, "started_at")?),
            ended_at: row
                .try_get::<Option<String>, _>("ended_at")
                .map_err(column_err("ended_at"))?
                .map(|s| parse_instant(&s)),
            token_usage: row.try_get("token_usage").map_err(column_err("token_usage"))?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let role: String = get_text(row, "role")?;
        let token_count: i64 = row
            .try_get("token_count")
            .map_err(column_err("token_count"))?;
        Ok(Message {
            id: get_text(row, "id")?,
            session_id: get_text(row, "session_id")?,
            role: if role == "assistant" {
                Role::Assistant
            } else {
                Role::User
            },
            content: get_text(row, "content")?,
            created_at: parse_instant(&get_text(row, "created_at")?),
            token_count: token_count.max(0) as usize,
        })
    }

    fn row_to_artifact(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeArtifact, StoreError> {
        let content_json: String = get_text(row, "content")?;
        let content: ArtifactContent = serde_json::from_str(&content_json)
            .map_err(|e| StoreError::Serialize(format!("artifact content: {e}")))?;
        let tags_json: String = get_text(row, "tags")?;
        let metadata_json: String = get_text(row, "metadata")?;
        let method: String = get_text(row, "extraction_method")?;
        let auto_generated: i64 = row
            .try_get("auto_generated")
            .map_err(column_err("auto_generated"))?;

        Ok(KnowledgeArtifact {
            id: get_text(row, "id")?,
            project_id: get_text(row, "project_id")?,
            artifact_type: ArtifactType::parse(&get_text(row, "artifact_type")?),
            name: get_text(row, "name")?,
            content,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            relevance_score: row
                .try_get("relevance_score")
                .map_err(column_err("relevance_score"))?,
            extraction_method: if method == "manual" {
                ExtractionMethod::Manual
            } else {
                ExtractionMethod::Automatic
            },
            extraction_confidence: row
                .try_get("extraction_confidence")
                .map_err(column_err("extraction_confidence"))?,
            auto_generated: auto_generated != 0,
            source_message_id: row
                .try_get("source_message_id")
                .map_err(column_err("source_message_id"))?,
            created_at: parse_instant(&get_text(row, "created_at")?),
            updated_at: parse_instant(&get_text(row, "updated_at")?),
        })
    }

    async fn insert_artifact_row(
        &self,
        artifact: &KnowledgeArtifact,
    ) -> Result<(), StoreError> {
        let content_json = serde_json::to_string(&artifact.content)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        let tags_json = serde_json::to_string(&artifact.tags)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        let metadata_json = serde_json::to_string(&artifact.metadata)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_artifacts
                (id, project_id, artifact_type, name, content, tags, metadata,
                 relevance_score, extraction_method, extraction_confidence,
                 auto_generated, source_message_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&artifact.id)
        .bind(&artifact.project_id)
        .bind(artifact.artifact_type.as_str())
        .bind(&artifact.name)
        .bind(&content_json)
        .bind(&tags_json)
        .bind(&metadata_json)
        .bind(artifact.relevance_score)
        .bind(match artifact.extraction_method {
            ExtractionMethod::Manual => "manual",
            ExtractionMethod::Automatic => "automatic",
        })
        .bind(artifact.extraction_confidence)
        .bind(artifact.auto_generated as i64)
        .bind(&artifact.source_message_id)
        .bind(artifact.created_at.to_rfc3339())
        .bind(artifact.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(format!("artifact insert: {e}")))?;

        Ok(())
    }

    /// Build a safe FTS5 query from user text: each word quoted with prefix
    /// matching, joined with implicit AND.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                let clean: String = w
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if clean.is_empty() {
                    String::new()
                } else {
                    format!("\"{clean}\"*")
                }
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

fn get_text(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<String, StoreError> {
    row.try_get(column).map_err(column_err(column))
}

fn column_err(column: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Io(format!("{column} column: {e}"))
}

fn parse_instant(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_or_create_project(&self, name: &str) -> Result<Project, StoreError> {
        if let Some(row) = sqlx::query("SELECT * FROM projects WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(format!("project lookup: {e}")))?
        {
            let metadata_json: String = get_text(&row, "metadata")?;
            return Ok(Project {
                id: get_text(&row, "id")?,
                name: get_text(&row, "name")?,
                created_at: parse_instant(&get_text(&row, "created_at")?),
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            });
        }

        let project = Project::new(name);
        sqlx::query("INSERT INTO projects (id, name, created_at, metadata) VALUES (?1, ?2, ?3, '{}')")
            .bind(&project.id)
            .bind(&project.name)
            .bind(project.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Io(format!("project insert: {e}")))?;

        debug!(project = name, "Created project");
        Ok(project)
    }

    async fn start_session(
        &self,
        project_id: &str,
        name: Option<String>,
    ) -> Result<Session, StoreError> {
        let session = Session::start(project_id, name);
        sqlx::query(
            "INSERT INTO sessions (id, project_id, name, started_at, token_usage)
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(&session.id)
        .bind(&session.project_id)
        .bind(&session.name)
        .bind(session.started_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(format!("session insert: {e}")))?;

        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(format!("session lookup: {e}")))?;

        match row {
            Some(ref row) => Self::row_to_session(row),
            None => Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            }),
        }
    }

    async fn end_session(
        &self,
        session_id: &str,
        context_dump: serde_json::Value,
        summary: Option<String>,
        tokens_used: i64,
    ) -> Result<(), StoreError> {
        let dump_json = serde_json::to_string(&context_dump)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE sessions
             SET ended_at = ?1, context_dump = ?2, summary = ?3, token_usage = ?4
             WHERE id = ?5",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&dump_json)
        .bind(&summary)
        .bind(tokens_used)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Io(format!("session close: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn append_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<String>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Io(format!("message tx: {e}")))?;

        let mut ids = Vec::with_capacity(messages.len());
        for mut message in messages {
            if message.id.is_empty() {
                message.id = Uuid::new_v4().to_string();
            }
            sqlx::query(
                "INSERT INTO messages (id, session_id, role, content, created_at, token_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&message.id)
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.created_at.to_rfc3339())
            .bind(message.token_count as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Io(format!("message insert: {e}")))?;
            ids.push(message.id);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Io(format!("message commit: {e}")))?;
        Ok(ids)
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Message>, StoreError> {
        // Insertion order (iid) is the ordering guarantee: appends within a
        // session happen in call sequence.
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ?1 ORDER BY iid DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Io(format!("recent messages: {e}")))?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<_, _>>()?;
        messages.reverse(); // most-recent last
        Ok(messages)
    }

    async fn search_artifacts(
        &self,
        project_id: &str,
        query: &str,
        max: usize,
    ) -> Result<Vec<KnowledgeArtifact>, StoreError> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            // No searchable tokens: most relevant recent artifacts.
            let rows = sqlx::query(
                "SELECT * FROM knowledge_artifacts WHERE project_id = ?1
                 ORDER BY relevance_score DESC, iid DESC LIMIT ?2",
            )
            .bind(project_id)
            .bind(max as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Io(format!("artifact listing: {e}")))?;
            return rows.iter().map(Self::row_to_artifact).collect();
        }

        let rows = sqlx::query(
            r#"
            SELECT a.*, bm25(artifacts_fts) AS rank
            FROM artifacts_fts f
            JOIN knowledge_artifacts a ON a.iid = f.rowid
            WHERE artifacts_fts MATCH ?1 AND a.project_id = ?2
            ORDER BY rank, a.relevance_score DESC
            LIMIT ?3
            "#,
        )
        .bind(&fts_query)
        .bind(project_id)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Io(format!("artifact search: {e}")))?;

        rows.iter().map(Self::row_to_artifact).collect()
    }

    async fn find_similar_artifacts(
        &self,
        project_id: &str,
        _title: &str,
        _content_prefix: &str,
        window: chrono::Duration,
    ) -> Result<Vec<KnowledgeArtifact>, StoreError> {
        // Candidate set: recent auto-generated artifacts in the window.
        // The similarity decision itself is the extractor's, not SQL's.
        let rows = sqlx::query(
            "SELECT * FROM knowledge_artifacts
             WHERE project_id = ?1 AND auto_generated = 1
             ORDER BY iid DESC LIMIT 100",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Io(format!("similarity scan: {e}")))?;

        let cutoff = Utc::now() - window;
        let candidates: Vec<KnowledgeArtifact> = rows
            .iter()
            .map(Self::row_to_artifact)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|a| a.created_at >= cutoff)
            .collect();
        Ok(candidates)
    }

    async fn put_artifact(
        &self,
        mut artifact: KnowledgeArtifact,
    ) -> Result<KnowledgeArtifact, StoreError> {
        let now = Utc::now();
        artifact.updated_at = now;

        if artifact.artifact_type == ArtifactType::SystemConfig {
            // The one type with a (project_id, name) uniqueness guarantee:
            // replace in place when the name already exists.
            let existing = sqlx::query(
                "SELECT id, created_at FROM knowledge_artifacts
                 WHERE project_id = ?1 AND name = ?2 AND artifact_type = 'system_config'",
            )
            .bind(&artifact.project_id)
            .bind(&artifact.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(format!("config lookup: {e}")))?;

            if let Some(row) = existing {
                artifact.id = get_text(&row, "id")?;
                artifact.created_at = parse_instant(&get_text(&row, "created_at")?);
                let content_json = serde_json::to_string(&artifact.content)
                    .map_err(|e| StoreError::Serialize(e.to_string()))?;
                sqlx::query(
                    "UPDATE knowledge_artifacts
                     SET content = ?1, updated_at = ?2 WHERE id = ?3",
                )
                .bind(&content_json)
                .bind(now.to_rfc3339())
                .bind(&artifact.id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Io(format!("config update: {e}")))?;
                return Ok(artifact);
            }
        }

        if artifact.id.is_empty() {
            artifact.id = Uuid::new_v4().to_string();
        }
        artifact.created_at = now;
        self.insert_artifact_row(&artifact).await?;
        debug!(artifact = %artifact.name, "Stored artifact");
        Ok(artifact)
    }

    async fn project_facts(&self, project_id: &str) -> Result<ProjectFacts, StoreError> {
        let row = sqlx::query("SELECT name, metadata FROM projects WHERE id = ?1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Io(format!("facts lookup: {e}")))?;

        let Some(row) = row else {
            return Err(StoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            });
        };

        let metadata_json: String = get_text(&row, "metadata")?;
        let metadata: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&metadata_json).unwrap_or_default();
        let description = metadata
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(ProjectFacts {
            name: get_text(&row, "name")?,
            description,
            metadata,
        })
    }
}
