//! Indexed vector store: buffer + index + similarity behind one lock.
//!
//! [`IndexedVectorStore`] is the facade the memory layer talks to. It holds
//! the vector buffer and the ANN index together behind a single
//! reader-writer lock: searches take the read lock, insert/replace/delete
//! the write lock, so the index can never reference a slot the buffer has
//! already recycled.
//!
//! Beside the buffer it keeps a small *indexed metadata* map (persona, kind,
//! creation time) used for post-filtering search results; full records live
//! in the metadata store one layer up.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::buffer::VectorBuffer;
use crate::error::{Result, StoreError};
use crate::hnsw::{HnswIndex, HnswParams};
use crate::similarity;
use crate::types::{Deadline, DistanceMetric, StoreStats, VectorId};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which index backs searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Multilayer graph index with exhaustive fallback below the threshold.
    Hnsw,
    /// Exhaustive scan only.
    Flat,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Hnsw => "hnsw",
            IndexKind::Flat => "flat",
        }
    }

    /// Parse an index kind, rejecting unknown values.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "hnsw" => Ok(IndexKind::Hnsw),
            "flat" => Ok(IndexKind::Flat),
            other => Err(StoreError::Validation(format!(
                "unknown index type '{}' (expected hnsw or flat)",
                other
            ))),
        }
    }
}

/// Store construction parameters.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Memory budget for the flat buffer, in bytes.
    pub max_memory_bytes: usize,
    /// Vector dimensionality; all inserts must match.
    pub dimensions: usize,
    /// Ranking metric.
    pub metric: DistanceMetric,
    /// Index backing searches.
    pub index: IndexKind,
    /// Below this many indexed vectors, search falls back to exhaustive scan.
    pub index_threshold: usize,
    /// Optional hard cap on capacity, applied after the memory-derived one.
    pub max_vectors: Option<usize>,
    /// Graph parameters.
    pub hnsw: HnswParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 512 * 1024 * 1024,
            dimensions: 1536,
            metric: DistanceMetric::Cosine,
            index: IndexKind::Hnsw,
            index_threshold: 100,
            max_vectors: None,
            hnsw: HnswParams::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search types
// ─────────────────────────────────────────────────────────────────────────────

/// Indexed metadata kept beside each vector for search-time filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedMeta {
    /// Owning persona, if any. Persona-scoped searches filter on this.
    pub persona_id: Option<String>,
    /// Record kind (memory type at the persona layer).
    pub kind: Option<String>,
    /// Creation time, milliseconds since the epoch.
    pub created_at_ms: i64,
}

/// Metadata filters applied after similarity ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Keep only vectors owned by this persona.
    pub persona_id: Option<String>,
    /// Keep only these kinds; empty keeps all.
    pub kinds: Vec<String>,
    /// Keep only vectors younger than this, relative to `now_ms`.
    pub max_age_ms: Option<i64>,
    /// Reference time for the age filter; callers pass their notion of now.
    pub now_ms: i64,
}

impl SearchFilters {
    fn is_empty(&self) -> bool {
        self.persona_id.is_none() && self.kinds.is_empty() && self.max_age_ms.is_none()
    }

    fn matches(&self, meta: Option<&IndexedMeta>) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(meta) = meta else {
            // Unmetadata'd vectors can never satisfy a scoped filter.
            return false;
        };
        if let Some(ref persona) = self.persona_id {
            if meta.persona_id.as_deref() != Some(persona.as_str()) {
                return false;
            }
        }
        if !self.kinds.is_empty() {
            match meta.kind {
                Some(ref k) if self.kinds.iter().any(|f| f == k) => {}
                _ => return false,
            }
        }
        if let Some(max_age) = self.max_age_ms {
            if self.now_ms - meta.created_at_ms > max_age {
                return false;
            }
        }
        true
    }
}

/// Per-query options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results returned.
    pub limit: usize,
    /// Minimum similarity; results below are dropped.
    pub threshold: Option<f32>,
    /// Beam-width override for this query.
    pub ef: Option<usize>,
    /// Metadata filters, applied after ranking.
    pub filters: SearchFilters,
    /// Attach vector values to hits.
    pub include_values: bool,
    /// Attach indexed metadata to hits.
    pub include_metadata: bool,
    /// Operation deadline.
    pub deadline: Deadline,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
            ef: None,
            filters: SearchFilters::default(),
            include_values: false,
            include_metadata: false,
            deadline: Deadline::none(),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: VectorId,
    /// Similarity in the metric's higher-is-better space.
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexedMeta>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

struct StoreInner {
    buffer: VectorBuffer,
    index: HnswIndex,
    meta: HashMap<VectorId, IndexedMeta>,
    rng: SmallRng,
}

/// Thread-safe facade over buffer, index, and similarity math.
pub struct IndexedVectorStore {
    inner: RwLock<StoreInner>,
    config: StoreConfig,
}

impl IndexedVectorStore {
    /// Build a store from configuration.
    ///
    /// Capacity derives from the memory budget, clamped by `max_vectors`
    /// when set.
    pub fn new(config: StoreConfig) -> Result<Self> {
        if config.dimensions == 0 {
            return Err(StoreError::Validation(
                "dimensions must be non-zero".to_string(),
            ));
        }
        let buffer = match config.max_vectors {
            Some(cap) => {
                let budget_cap =
                    config.max_memory_bytes / (config.dimensions * std::mem::size_of::<f32>());
                VectorBuffer::with_capacity(cap.min(budget_cap.max(1)), config.dimensions)
            }
            None => VectorBuffer::new(config.max_memory_bytes, config.dimensions)?,
        };
        info!(
            capacity = buffer.capacity(),
            dimensions = config.dimensions,
            metric = %config.metric,
            index = config.index.as_str(),
            "indexed vector store ready"
        );
        Ok(Self {
            inner: RwLock::new(StoreInner {
                buffer,
                index: HnswIndex::new(config.metric, config.hnsw.clone()),
                meta: HashMap::new(),
                rng: SmallRng::from_entropy(),
            }),
            config,
        })
    }

    /// Build a store with a seeded RNG for reproducible index construction.
    pub fn with_seed(config: StoreConfig, seed: u64) -> Result<Self> {
        let store = Self::new(config)?;
        store.inner.write().unwrap().rng = SmallRng::seed_from_u64(seed);
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Configured dimensionality.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a vector with its indexed metadata.
    ///
    /// Buffer write and index link happen under one write-lock acquisition;
    /// if the index link fails the buffer insert is rolled back, so the
    /// caller observes all-or-nothing behavior.
    pub fn add_vector(&self, id: VectorId, vector: &[f32], meta: IndexedMeta) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let slot = inner.buffer.insert(id, vector)?;

        if self.config.index == IndexKind::Hnsw {
            let StoreInner {
                buffer,
                index,
                rng,
                ..
            } = &mut *inner;
            if let Err(e) = index.insert(buffer, slot, rng) {
                inner.buffer.delete(id).ok();
                return Err(e);
            }
        }
        inner.meta.insert(id, meta);
        debug!(%id, slot, "vector added");
        Ok(())
    }

    /// Fetch a stored vector by id.
    pub fn get_vector(&self, id: VectorId) -> Result<Vec<f32>> {
        let inner = self.inner.read().unwrap();
        inner.buffer.get(id).map(|v| v.to_vec())
    }

    /// Cached magnitude for a stored vector.
    pub fn magnitude(&self, id: VectorId) -> Result<f32> {
        self.inner.read().unwrap().buffer.magnitude(id)
    }

    /// Indexed metadata for a stored vector.
    pub fn get_meta(&self, id: VectorId) -> Option<IndexedMeta> {
        self.inner.read().unwrap().meta.get(&id).cloned()
    }

    /// Replace a vector in place. The id is unchanged; the index entry is
    /// relinked so the graph reflects the new position.
    pub fn update_vector(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let slot = inner.buffer.slot_of(id).ok_or(StoreError::NotFound(id))?;
        inner.buffer.replace(id, vector)?;

        if self.config.index == IndexKind::Hnsw && inner.index.contains(slot) {
            inner.index.remove(slot);
            let StoreInner {
                buffer,
                index,
                rng,
                ..
            } = &mut *inner;
            index.insert(buffer, slot, rng)?;
        }
        Ok(())
    }

    /// Update a vector's indexed metadata.
    pub fn update_meta(&self, id: VectorId, meta: IndexedMeta) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.buffer.contains(id) {
            return Err(StoreError::NotFound(id));
        }
        inner.meta.insert(id, meta);
        Ok(())
    }

    /// Delete a vector: unlink from the index, then free the slot.
    ///
    /// Ordered so a concurrent search that starts after this write-lock
    /// releases can never rank the dead slot.
    pub fn delete_vector(&self, id: VectorId) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let slot = inner.buffer.slot_of(id).ok_or(StoreError::NotFound(id))?;
        inner.index.remove(slot);
        inner.buffer.delete(id)?;
        inner.meta.remove(&id);
        debug!(%id, slot, "vector deleted");
        Ok(())
    }

    /// Top-k similarity search.
    ///
    /// Dispatches to the graph index or an exhaustive scan: the scan runs
    /// when the store is configured flat or holds fewer than
    /// `index_threshold` vectors (where exact is also fastest). Candidates
    /// are over-fetched at `max(3·limit, ef)`, filters apply after
    /// similarity ranking, and the final result is the first `limit` hits
    /// passing both filters and threshold.
    pub fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
        if query.len() != self.config.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: query.len(),
            });
        }
        options.deadline.check()?;

        let inner = self.inner.read().unwrap();
        let ef = options.ef.unwrap_or(self.config.hnsw.ef_search);
        let use_scan = self.config.index == IndexKind::Flat
            || inner.index.len() < self.config.index_threshold;

        // (id, similarity) candidates, best first.
        let candidates: Vec<(VectorId, f32)> = if use_scan {
            self.scan_all(&inner, query, &options.deadline)?
        } else {
            let fetch = (options.limit * 3).max(ef).max(options.limit);
            inner
                .index
                .search(&inner.buffer, query, fetch, ef)
                .into_iter()
                .filter_map(|(slot, dist)| {
                    inner.buffer.id_at(slot).map(|id| {
                        (
                            id,
                            similarity::similarity_from_distance(self.config.metric, dist),
                        )
                    })
                })
                .collect()
        };
        options.deadline.check()?;

        let threshold = options.threshold.unwrap_or(f32::NEG_INFINITY);
        let mut hits = Vec::with_capacity(options.limit);
        for (i, (id, sim)) in candidates.into_iter().enumerate() {
            if hits.len() >= options.limit {
                break;
            }
            if i % 256 == 255 {
                options.deadline.check()?;
            }
            if sim < threshold {
                // Candidates arrive best-first; everything after is worse.
                break;
            }
            if !options.filters.matches(inner.meta.get(&id)) {
                continue;
            }
            hits.push(SearchHit {
                id,
                similarity: sim,
                values: if options.include_values {
                    inner.buffer.get(id).ok().map(|v| v.to_vec())
                } else {
                    None
                },
                metadata: if options.include_metadata {
                    inner.meta.get(&id).cloned()
                } else {
                    None
                },
            });
        }
        Ok(hits)
    }

    /// Exhaustive scan over all occupied slots, best first.
    fn scan_all(
        &self,
        inner: &StoreInner,
        query: &[f32],
        deadline: &Deadline,
    ) -> Result<Vec<(VectorId, f32)>> {
        let query_mag = similarity::magnitude(query);
        let mut scored: Vec<(VectorId, usize, f32)> = Vec::with_capacity(inner.buffer.len());
        for (i, (id, slot)) in inner.buffer.iter().enumerate() {
            if i % 1024 == 1023 {
                deadline.check()?;
            }
            let v = inner.buffer.vector_at(slot).expect("occupied slot");
            let mag = inner.buffer.magnitude_at(slot).expect("occupied slot");
            let sim = similarity::similarity(self.config.metric, query, v, query_mag, mag);
            scored.push((id, slot, sim));
        }
        // Descending similarity, ties toward the lower slot id.
        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)));
        Ok(scored.into_iter().map(|(id, _, sim)| (id, sim)).collect())
    }

    /// Drop vectors whose indexed metadata says they are older than
    /// `max_age_ms` relative to `now_ms`. Returns the ids removed.
    ///
    /// This is the store-level half of decay cleanup; policy (importance
    /// tiers, per-persona decay times) lives in the memory layer, which
    /// calls targeted deletes instead when records are in play.
    pub fn cleanup(&self, max_age_ms: i64, now_ms: i64) -> Vec<VectorId> {
        let mut inner = self.inner.write().unwrap();
        let expired: Vec<VectorId> = inner
            .meta
            .iter()
            .filter(|(_, meta)| now_ms - meta.created_at_ms > max_age_ms)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(slot) = inner.buffer.slot_of(*id) {
                inner.index.remove(slot);
                inner.buffer.delete(*id).ok();
            }
            inner.meta.remove(id);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "store cleanup");
        }
        expired
    }

    /// Usage metrics.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read().unwrap();
        StoreStats {
            buffer: inner.buffer.stats(),
            indexed: inner.index.len(),
            entry_level: inner.index.entry_level(),
            metric: self.config.metric,
        }
    }

    /// Remove every vector and reset the index.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        let dims = inner.buffer.dimensions();
        let capacity = inner.buffer.capacity();
        inner.buffer = VectorBuffer::with_capacity(capacity, dims);
        inner.index.clear();
        inner.meta.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(dims: usize, capacity: usize, index: IndexKind) -> IndexedVectorStore {
        IndexedVectorStore::with_seed(
            StoreConfig {
                max_memory_bytes: capacity * dims * 4,
                dimensions: dims,
                metric: DistanceMetric::Cosine,
                index,
                index_threshold: 4,
                max_vectors: None,
                hnsw: HnswParams::with_m(8),
            },
            7,
        )
        .unwrap()
    }

    fn basis(dims: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_basis_vector_search_scenario() {
        // Basis vectors e1, e2, and (e1+e2)/√2 in D=1536; query e1, cosine, k=2.
        let dims = 1536;
        let store = store_with(dims, 16, IndexKind::Flat);

        let a = VectorId::new();
        let b = VectorId::new();
        let c = VectorId::new();
        store
            .add_vector(a, &basis(dims, 0), IndexedMeta::default())
            .unwrap();
        store
            .add_vector(b, &basis(dims, 1), IndexedMeta::default())
            .unwrap();
        let inv_sqrt2 = 1.0 / 2.0f32.sqrt();
        let mut diag = vec![0.0; dims];
        diag[0] = inv_sqrt2;
        diag[1] = inv_sqrt2;
        store.add_vector(c, &diag, IndexedMeta::default()).unwrap();

        let hits = store
            .search(
                &basis(dims, 0),
                &SearchOptions {
                    limit: 2,
                    threshold: Some(0.0),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, a);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].id, c);
        assert!((hits[1].similarity - inv_sqrt2).abs() < 1e-4);
    }

    #[test]
    fn test_flat_fallback_is_exact() {
        // Below index_threshold the scan must return the exact top-k.
        let store = store_with(4, 16, IndexKind::Hnsw);
        let ids: Vec<VectorId> = (0..3).map(|_| VectorId::new()).collect();
        store
            .add_vector(ids[0], &[1.0, 0.0, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        store
            .add_vector(ids[1], &[0.9, 0.1, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        store
            .add_vector(ids[2], &[0.0, 0.0, 1.0, 0.0], IndexedMeta::default())
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0, 0.0, 0.0], &SearchOptions::default())
            .unwrap();
        assert_eq!(hits[0].id, ids[0]);
        assert_eq!(hits[1].id, ids[1]);
        assert_eq!(hits[2].id, ids[2]);
    }

    #[test]
    fn test_deleted_ids_never_surface() {
        // Insert a corpus, delete a prefix, then search for a
        // survivor: it ranks first with similarity ≈ 1 and no deleted id
        // appears.
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let dims = 16;
        let store = store_with(dims, 600, IndexKind::Hnsw);
        let mut r = SmallRng::seed_from_u64(3);
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for _ in 0..500 {
            let mut v: Vec<f32> = (0..dims).map(|_| r.gen::<f32>() * 2.0 - 1.0).collect();
            let norm = similarity::magnitude(&v);
            for x in &mut v {
                *x /= norm;
            }
            let id = VectorId::new();
            store.add_vector(id, &v, IndexedMeta::default()).unwrap();
            ids.push(id);
            vectors.push(v);
        }
        for id in &ids[..100] {
            store.delete_vector(*id).unwrap();
        }

        let hits = store
            .search(
                &vectors[150],
                &SearchOptions {
                    limit: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(hits[0].id, ids[150]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-4);
        for hit in &hits {
            assert!(!ids[..100].contains(&hit.id));
        }
    }

    #[test]
    fn test_threshold_filters_orthogonal_corpus() {
        // Orthogonal vectors under a high threshold yield an
        // empty result, not an error.
        let dims = 128;
        let store = store_with(dims, 128, IndexKind::Flat);
        for axis in 1..101 {
            store
                .add_vector(VectorId::new(), &basis(dims, axis % dims), IndexedMeta::default())
                .unwrap();
        }
        let hits = store
            .search(
                &basis(dims, 0),
                &SearchOptions {
                    limit: 5,
                    threshold: Some(0.9),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_persona_filter_correctness() {
        let store = store_with(4, 16, IndexKind::Flat);
        for i in 0..10 {
            let persona = if i % 2 == 0 { "alice" } else { "bob" };
            store
                .add_vector(
                    VectorId::new(),
                    &[1.0, i as f32 * 0.01, 0.0, 0.0],
                    IndexedMeta {
                        persona_id: Some(persona.to_string()),
                        kind: Some("fact".to_string()),
                        created_at_ms: 1_000,
                    },
                )
                .unwrap();
        }

        let hits = store
            .search(
                &[1.0, 0.0, 0.0, 0.0],
                &SearchOptions {
                    limit: 10,
                    include_metadata: true,
                    filters: SearchFilters {
                        persona_id: Some("alice".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(hits.len(), 5);
        for hit in hits {
            assert_eq!(
                hit.metadata.unwrap().persona_id.as_deref(),
                Some("alice")
            );
        }
    }

    #[test]
    fn test_kind_and_age_filters() {
        let store = store_with(4, 16, IndexKind::Flat);
        let now = 100_000i64;
        let fresh_fact = VectorId::new();
        store
            .add_vector(
                fresh_fact,
                &[1.0, 0.0, 0.0, 0.0],
                IndexedMeta {
                    persona_id: None,
                    kind: Some("fact".to_string()),
                    created_at_ms: now - 1_000,
                },
            )
            .unwrap();
        store
            .add_vector(
                VectorId::new(),
                &[1.0, 0.0, 0.0, 0.0],
                IndexedMeta {
                    persona_id: None,
                    kind: Some("fact".to_string()),
                    created_at_ms: now - 90_000,
                },
            )
            .unwrap();
        store
            .add_vector(
                VectorId::new(),
                &[1.0, 0.0, 0.0, 0.0],
                IndexedMeta {
                    persona_id: None,
                    kind: Some("context".to_string()),
                    created_at_ms: now - 1_000,
                },
            )
            .unwrap();

        let hits = store
            .search(
                &[1.0, 0.0, 0.0, 0.0],
                &SearchOptions {
                    limit: 10,
                    filters: SearchFilters {
                        kinds: vec!["fact".to_string()],
                        max_age_ms: Some(10_000),
                        now_ms: now,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, fresh_fact);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let store = store_with(4, 8, IndexKind::Flat);
        let err = store
            .search(&[1.0, 0.0], &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_update_vector_moves_in_ranking() {
        let store = store_with(4, 8, IndexKind::Flat);
        let id = VectorId::new();
        store
            .add_vector(id, &[0.0, 1.0, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        store
            .add_vector(VectorId::new(), &[0.5, 0.5, 0.0, 0.0], IndexedMeta::default())
            .unwrap();

        store.update_vector(id, &[1.0, 0.0, 0.0, 0.0]).unwrap();

        let hits = store
            .search(&[1.0, 0.0, 0.0, 0.0], &SearchOptions::default())
            .unwrap();
        assert_eq!(hits[0].id, id);
        assert!((store.magnitude(id).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_delete_then_stats() {
        let store = store_with(4, 8, IndexKind::Hnsw);
        let id = VectorId::new();
        store
            .add_vector(id, &[1.0, 0.0, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        assert_eq!(store.stats().buffer.in_use, 1);
        assert_eq!(store.stats().indexed, 1);

        store.delete_vector(id).unwrap();
        let stats = store.stats();
        assert_eq!(stats.buffer.in_use, 0);
        assert_eq!(stats.indexed, 0);
        assert!(stats.entry_level.is_none());
        assert!(matches!(
            store.get_vector(id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_max_vectors_caps_capacity() {
        let store = IndexedVectorStore::new(StoreConfig {
            max_memory_bytes: 1024 * 1024,
            dimensions: 4,
            max_vectors: Some(2),
            ..Default::default()
        })
        .unwrap();
        store
            .add_vector(VectorId::new(), &[1.0, 0.0, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        store
            .add_vector(VectorId::new(), &[0.0, 1.0, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        let err = store
            .add_vector(VectorId::new(), &[0.0, 0.0, 1.0, 0.0], IndexedMeta::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::BufferFull { capacity: 2 }));
    }

    #[test]
    fn test_cleanup_by_age() {
        let store = store_with(4, 8, IndexKind::Hnsw);
        let old = VectorId::new();
        let fresh = VectorId::new();
        store
            .add_vector(
                old,
                &[1.0, 0.0, 0.0, 0.0],
                IndexedMeta {
                    created_at_ms: 1_000,
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .add_vector(
                fresh,
                &[0.0, 1.0, 0.0, 0.0],
                IndexedMeta {
                    created_at_ms: 90_000,
                    ..Default::default()
                },
            )
            .unwrap();

        let removed = store.cleanup(10_000, 100_000);
        assert_eq!(removed, vec![old]);
        assert!(store.get_vector(old).is_err());
        assert!(store.get_vector(fresh).is_ok());
        assert_eq!(store.stats().indexed, 1);
    }

    #[test]
    fn test_expired_deadline_fails_search() {
        let store = store_with(4, 8, IndexKind::Flat);
        store
            .add_vector(VectorId::new(), &[1.0, 0.0, 0.0, 0.0], IndexedMeta::default())
            .unwrap();
        let err = store
            .search(
                &[1.0, 0.0, 0.0, 0.0],
                &SearchOptions {
                    deadline: Deadline::in_millis(0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::sync::Arc;

        let store = Arc::new(store_with(8, 4096, IndexKind::Hnsw));
        let mut handles = Vec::new();

        for w in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let mut v = vec![0.0f32; 8];
                    v[w % 8] = 1.0;
                    v[(w + i) % 8] += 0.5;
                    store
                        .add_vector(VectorId::new(), &v, IndexedMeta::default())
                        .unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let hits = store
                        .search(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], &SearchOptions::default())
                        .unwrap();
                    // Every hit must still resolve: no freed slot leaks out.
                    for hit in hits {
                        assert!(store.get_vector(hit.id).is_ok());
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 400);

        // Everything written is searchable afterwards.
        let all = store
            .search(
                &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                &SearchOptions {
                    limit: 400,
                    ef: Some(400),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!all.is_empty());
    }
}
