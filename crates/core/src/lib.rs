//! # Durandal Core
//!
//! Domain types, capability traits, and error definitions for the Durandal
//! memory substrate. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators — the durable document store and the
//! language model — are traits here. Implementations live in their own
//! crates (or in the host). This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod artifact;
pub mod cache;
pub mod context;
pub mod error;
pub mod language_model;
pub mod message;
pub mod pricing;
pub mod project;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use artifact::{ArtifactContent, ArtifactType, ExtractionMethod, KnowledgeArtifact};
pub use cache::{CacheEntry, CacheHints, CacheStats, CacheTier, Stored};
pub use context::{ContextPayload, ContextSection, PayloadMetadata, SectionKind};
pub use error::{
    CacheError, ContextError, Error, ExtractionError, LmError, RecordError, Result, StoreError,
};
pub use language_model::LanguageModel;
pub use message::{estimate_tokens, Message, Role};
pub use project::{Project, ProjectFacts, Session};
pub use store::DocumentStore;
