//! Persona memory for Reverie.
//!
//! This crate layers persona-scoped memory lifecycle on top of
//! [`reverie_core`]'s indexed vector store:
//!
//! - [`MetadataStore`]: SQLite-backed records for personas, memories (with
//!   the original text and an optional embedding blob), and API keys.
//! - [`EmbeddingProvider`]: the pluggable `text -> vector` function, with
//!   mock, local-hash, and OpenAI implementations.
//! - [`PersonaMemoryManager`]: add/recall/conversation operations with
//!   importance-weighted eviction, time-decay cleanup, and fused ranking.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use reverie_core::{IndexedVectorStore, StoreConfig};
//! use reverie_memory::{
//!     MemoryContext, MetadataStore, MockEmbedder, PersonaConfig,
//!     PersonaMemoryManager, RecallOptions,
//! };
//!
//! let store = IndexedVectorStore::new(StoreConfig {
//!     dimensions: 32,
//!     max_memory_bytes: 1024 * 32 * 4,
//!     ..Default::default()
//! })?;
//! let metadata = Arc::new(MetadataStore::open_in_memory()?);
//! let manager = PersonaMemoryManager::new(store, metadata, Arc::new(MockEmbedder::new(32)));
//!
//! let persona = manager.create_persona("Ada", None, None, PersonaConfig::default())?;
//! manager.add_memory(persona.id, "met at the conference", MemoryContext::default())?;
//!
//! let recalled = manager.retrieve_relevant_memories(
//!     persona.id,
//!     "met at the conference",
//!     &RecallOptions::default(),
//! )?;
//! assert_eq!(recalled[0].record.content, "met at the conference");
//! # Ok::<(), reverie_memory::MemoryError>(())
//! ```

pub mod embedding;
pub mod error;
pub mod importance;
pub mod manager;
pub mod store;
pub mod types;

pub use embedding::{
    build_embedder, EmbeddingProvider, LocalHashEmbedder, MockEmbedder, OpenAiEmbedder,
    OpenAiEmbedderConfig, SharedEmbedder,
};
pub use error::{MemoryError, Result};
pub use importance::{EmotionalAnalyzer, ImportanceScorer, RelevanceAnalyzer};
pub use manager::{
    ConversationExchange, ManagerConfig, MemoryContext, PersonaMemoryManager, RecallOptions,
    RETENTION_THRESHOLD_DEFAULT,
};
pub use store::{ApiKeyRecord, MetadataStore, Permission};
pub use types::{
    MemoryFilters, MemoryRecord, MemoryStats, MemoryType, MemoryUpdate, Persona, PersonaConfig,
    PersonaId, ScoredMemory, Speaker,
};
