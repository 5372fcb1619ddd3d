//! Message domain types.
//!
//! Messages are append-only within a session. Ordering is by `created_at`,
//! then insertion order for same-timestamp appends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The AI assistant.
    Assistant,
}

impl Role {
    /// The stable string form used in storage and rendering.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single persisted message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID.
    pub id: String,

    /// The owning session.
    pub session_id: String,

    /// Who sent this message.
    pub role: Role,

    /// The text content.
    pub content: String,

    /// Timestamp.
    pub created_at: DateTime<Utc>,

    /// Estimated token count, recorded at append time.
    pub token_count: usize,
}

impl Message {
    /// Create a new user message for a session.
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, content)
    }

    /// Create a new assistant message for a session.
    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, content)
    }

    fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content,
            created_at: Utc::now(),
            token_count,
        }
    }

    /// Render as a single dialogue line (`user: …` / `assistant: …`).
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.content)
    }
}

/// Character-based token estimate: 1 token ≈ 4 characters, rounded up.
///
/// This is the one estimator shared by every component. For any text the
/// downstream model accepts it may over-count by up to 25% and under-counts
/// by at most 10%.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn estimate_is_subadditive_within_one() {
        let a = "some fragment of text";
        let b = "and the continuation";
        let joined = format!("{a}{b}");
        assert!(estimate_tokens(&joined) <= estimate_tokens(a) + estimate_tokens(b) + 1);
    }

    #[test]
    fn message_records_token_count() {
        let msg = Message::user("sess_1", "12345678"); // 8 chars → 2 tokens
        assert_eq!(msg.token_count, 2);
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn render_includes_role() {
        let msg = Message::assistant("sess_1", "done");
        assert_eq!(msg.render(), "assistant: done");
    }

    #[test]
    fn serialization_roundtrip() {
        let msg = Message::user("sess_1", "Hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "Hello");
        assert_eq!(back.role, Role::User);
        assert_eq!(back.session_id, "sess_1");
    }
}
