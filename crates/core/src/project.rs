//! Project and Session domain types.
//!
//! A Project is the top-level ownership unit: knowledge artifacts and
//! sessions belong to exactly one project. A Session is one continuous
//! conversation within a project; closing it stores a context snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A project — created once, never destroyed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID.
    pub id: String,

    /// Unique human-readable name.
    pub name: String,

    /// When this project was created.
    pub created_at: DateTime<Utc>,

    /// Free-form metadata bag.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Project {
    /// Create a new project with a fresh ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// A continuous conversation unit within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// The owning project.
    pub project_id: String,

    /// Session name (auto-generated when not supplied).
    pub name: String,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// When the session was closed. `None` while the session is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Cumulative token usage for the session.
    #[serde(default)]
    pub token_usage: i64,
}

impl Session {
    /// Start a new open session for a project.
    pub fn start(project_id: impl Into<String>, name: Option<String>) -> Self {
        let started_at = Utc::now();
        let name = name.unwrap_or_else(|| format!("session-{}", started_at.format("%Y%m%d-%H%M%S")));
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name,
            started_at,
            ended_at: None,
            token_usage: 0,
        }
    }

    /// Whether this session is still open.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// The project facts layer of an assembled context: name, description,
/// and whatever metadata the store carries for the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFacts {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ProjectFacts {
    /// Render the facts as a text block, optionally including metadata.
    ///
    /// The orchestrator drops metadata first when the project layer is over
    /// its token cap.
    pub fn render(&self, include_metadata: bool) -> String {
        let mut out = match &self.description {
            Some(desc) => format!("Project: {} — {}", self.name, desc),
            None => format!("Project: {}", self.name),
        };
        if include_metadata && !self.metadata.is_empty() {
            for (key, value) in &self.metadata {
                out.push_str(&format!("\n{}: {}", key, value));
            }
        }
        out
    }
}
