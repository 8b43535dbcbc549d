//! Core vector-memory engine: buffer, similarity math, ANN index, and the
//! indexed store facade.
//!
//! This crate is the bottom of the stack and is fully synchronous. It holds
//! up to a fixed number of fixed-dimension f32 vectors in one contiguous
//! allocation, maintains an HNSW proximity graph over them, and answers
//! top-k similarity queries with metadata post-filtering.
//!
//! # Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  IndexedVectorStore                                     │
//! │  - one RwLock over buffer + index + indexed metadata    │
//! │  - add/get/update/delete, top-k search, filters         │
//! ├───────────────────────────┬─────────────────────────────┤
//! │  VectorBuffer             │  HnswIndex                  │
//! │  - flat f32 slab, slots   │  - multilayer graph over    │
//! │  - id↔slot maps, free     │    slot ids                 │
//! │    list, magnitude cache  │  - insert/search/remove     │
//! └───────────────────────────┴─────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use reverie_core::{
//!     IndexedMeta, IndexedVectorStore, SearchOptions, StoreConfig, VectorId,
//! };
//!
//! let store = IndexedVectorStore::new(StoreConfig {
//!     dimensions: 4,
//!     max_memory_bytes: 1024,
//!     ..Default::default()
//! })?;
//!
//! let id = VectorId::new();
//! store.add_vector(id, &[1.0, 0.0, 0.0, 0.0], IndexedMeta::default())?;
//!
//! let hits = store.search(&[1.0, 0.0, 0.0, 0.0], &SearchOptions::default())?;
//! assert_eq!(hits[0].id, id);
//! # Ok::<(), reverie_core::StoreError>(())
//! ```

pub mod buffer;
pub mod error;
pub mod hnsw;
pub mod similarity;
pub mod store;
pub mod types;

pub use buffer::VectorBuffer;
pub use error::{Result, StoreError};
pub use hnsw::{HnswIndex, HnswParams};
pub use store::{
    IndexKind, IndexedMeta, IndexedVectorStore, SearchFilters, SearchHit, SearchOptions,
    StoreConfig,
};
pub use types::{BufferStats, Deadline, DistanceMetric, StoreStats, VectorId};
