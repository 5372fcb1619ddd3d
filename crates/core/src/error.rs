//! Error types for the Durandal domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level `Error`
//! aggregates them for callers that cross subsystem boundaries.

use thiserror::Error;

/// The top-level error type for all Durandal operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context assembly errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Document store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Language model errors ---
    #[error("Language model error: {0}")]
    LanguageModel(#[from] LmError),

    // --- Turn recording errors ---
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors from context assembly.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(
        "User turn ({user_tokens} tokens) exceeds budget ({budget} tokens minus {floor} floor)"
    )]
    UserTurnTooLarge {
        user_tokens: usize,
        budget: usize,
        floor: usize,
    },

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Language model unavailable: {0}")]
    LmUnavailable(String),

    #[error("Assembly cancelled")]
    Cancelled,

    #[error("Internal assembly error: {0}")]
    Internal(String),
}

/// Errors from the durable document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a read of this error class is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

/// Errors from the RAMR cache. Normal eviction is not an error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Value serialization failed: {0}")]
    Serialize(String),

    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Cache capacity exhausted: {0}")]
    CapacityExhausted(String),
}

/// Errors from knowledge extraction.
///
/// These are carried inside `ExtractionResult.reason` rather than returned;
/// `analyze` never fails from the caller's perspective.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Pattern error in group '{group}': {message}")]
    Pattern { group: String, message: String },

    #[error("Internal extraction error: {0}")]
    Internal(String),
}

/// Errors from the language model capability.
#[derive(Debug, Error)]
pub enum LmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

/// Errors from `record_turn`.
///
/// Extraction and cache-warming failures are swallowed; only message
/// persistence failures and cancellation surface here.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Message persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("Recording cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_too_large_displays_counts() {
        let err = Error::Context(ContextError::UserTurnTooLarge {
            user_tokens: 5000,
            budget: 4096,
            floor: 64,
        });
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn store_io_is_transient() {
        assert!(StoreError::Io("disk".into()).is_transient());
        assert!(
            !StoreError::NotFound {
                entity: "session",
                id: "s1".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn record_error_wraps_store() {
        let err: RecordError = StoreError::Io("write failed".into()).into();
        assert!(err.to_string().contains("write failed"));
    }
}
