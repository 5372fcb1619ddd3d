//! # Durandal Orchestrator
//!
//! The composition root of the memory substrate. For every user turn the
//! orchestrator assembles a token-budgeted `ContextPayload` out of four
//! layers — project facts, rolling summary, relevant knowledge artifacts,
//! recent dialogue — and after the assistant replies it records the turn:
//! persist both messages, extract durable knowledge, and warm the cache.
//!
//! ## Ownership
//!
//! The orchestrator owns shared handles to every collaborator: the document
//! store and language model capabilities, the RAMR cache, and the knowledge
//! extractor. Nothing holds a handle back to the orchestrator; admission
//! scoring inside the cache is a pure function, not an extractor call.

pub mod accountant;
pub mod assemble;
pub mod record;
pub mod retry;

use durandal_cache::Ramr;
use durandal_config::EngineConfig;
use durandal_core::{CacheError, DocumentStore, LanguageModel};
use durandal_extractor::KnowledgeExtractor;
use std::sync::Arc;

pub use accountant::{allocate, estimate, LayerBudgets, LayerWeights, Mode};
pub use assemble::{fingerprint, AssembleRequest};
pub use record::{RecordOutcome, RecordTurnRequest};

/// The context orchestrator. One instance per agent process.
pub struct Orchestrator {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) language_model: Arc<dyn LanguageModel>,
    pub(crate) cache: Arc<Ramr>,
    pub(crate) extractor: KnowledgeExtractor,
    pub(crate) config: EngineConfig,
}

impl Orchestrator {
    /// Build an orchestrator, opening the cache per the configuration.
    pub async fn new(
        store: Arc<dyn DocumentStore>,
        language_model: Arc<dyn LanguageModel>,
        config: EngineConfig,
    ) -> Result<Self, CacheError> {
        let cache = Arc::new(Ramr::open(&config).await?);
        Ok(Self::with_cache(store, language_model, cache, config))
    }

    /// Build an orchestrator around an already-open cache. External
    /// consumers (semantic indexers and the like) may share the same
    /// `Arc<Ramr>` handle.
    pub fn with_cache(
        store: Arc<dyn DocumentStore>,
        language_model: Arc<dyn LanguageModel>,
        cache: Arc<Ramr>,
        config: EngineConfig,
    ) -> Self {
        let extractor = KnowledgeExtractor::new(&config);
        Self {
            store,
            language_model,
            cache,
            extractor,
            config,
        }
    }

    /// The shared cache handle.
    pub fn cache(&self) -> &Arc<Ramr> {
        &self.cache
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
