//! Persona-scoped memory lifecycle over the indexed vector store.
//!
//! [`PersonaMemoryManager`] maps human-meaningful operations (add a memory,
//! record a conversation turn, recall relevant context) onto the vector
//! store and the metadata store, and owns the policies around them:
//! per-persona capacity with importance-weighted eviction, time-decay
//! cleanup with a perpetual tier, and the fused ranking score used at
//! retrieval.
//!
//! The embedding provider is injected at construction (no process-wide
//! embedding singleton), and every embedding or SQL call happens outside
//! the vector-store lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reverie_core::{
    Deadline, IndexedMeta, IndexedVectorStore, SearchFilters, SearchOptions, StoreError, VectorId,
};

use crate::embedding::SharedEmbedder;
use crate::error::{MemoryError, Result};
use crate::importance::ImportanceScorer;
use crate::store::MetadataStore;
use crate::types::{
    MemoryFilters, MemoryRecord, MemoryStats, MemoryType, Persona, PersonaConfig, PersonaId,
    ScoredMemory, Speaker,
};

// ─────────────────────────────────────────────────────────────────────────────
// Scoring constants
// ─────────────────────────────────────────────────────────────────────────────

/// Final score = similarity + 0.10·importance + 0.05·recency.
const FINAL_IMPORTANCE_WEIGHT: f32 = 0.10;
const FINAL_RECENCY_WEIGHT: f32 = 0.05;

/// Recency half-life in retrieval: seven days, in hours.
const RECENCY_HALF_LIFE_HOURS: f64 = 7.0 * 24.0;

/// Eviction score = 0.5·(1−importance) + 0.3·age_fraction + 0.2·(1−recent_access).
const EVICT_IMPORTANCE_WEIGHT: f32 = 0.5;
const EVICT_AGE_WEIGHT: f32 = 0.3;
const EVICT_ACCESS_WEIGHT: f32 = 0.2;

/// Half-life of the recent-access factor in eviction, in hours.
const ACCESS_HALF_LIFE_HOURS: f64 = 24.0;

/// Memories at or above this importance survive decay cleanup regardless of
/// age (the perpetual tier).
pub const RETENTION_THRESHOLD_DEFAULT: f32 = 0.7;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Manager-level tunables.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Importance at or above which decay cleanup never removes a memory.
    pub retention_threshold: f32,
    /// Bounded retry attempts for dependency failures.
    pub retry_attempts: usize,
    /// Base delay of the exponential backoff between attempts.
    pub retry_base_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retention_threshold: RETENTION_THRESHOLD_DEFAULT,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Context supplied when adding a memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub memory_type: Option<MemoryType>,
    /// Explicit importance; when absent the scorer derives one.
    pub importance: Option<f32>,
    pub conversation_id: Option<String>,
    pub speaker: Option<Speaker>,
    pub tags: Vec<String>,
    pub context: Option<serde_json::Value>,
    pub deadline: Deadline,
}

/// Options for semantic recall.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    /// Number of memories returned.
    pub limit: usize,
    /// Minimum similarity; candidates below are dropped before fusion.
    pub threshold: Option<f32>,
    /// Restrict to these types; empty keeps all.
    pub memory_types: Vec<MemoryType>,
    /// Restrict to memories younger than this.
    pub max_age: Option<Duration>,
    pub deadline: Deadline,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
            memory_types: Vec::new(),
            max_age: None,
            deadline: Deadline::none(),
        }
    }
}

/// Result of storing one conversation turn pair.
#[derive(Debug, Clone)]
pub struct ConversationExchange {
    pub conversation_id: String,
    pub user: MemoryRecord,
    pub assistant: MemoryRecord,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// The persona memory lifecycle layer.
pub struct PersonaMemoryManager {
    store: IndexedVectorStore,
    metadata: Arc<MetadataStore>,
    embedder: SharedEmbedder,
    scorer: ImportanceScorer,
    config: ManagerConfig,
}

impl PersonaMemoryManager {
    pub fn new(
        store: IndexedVectorStore,
        metadata: Arc<MetadataStore>,
        embedder: SharedEmbedder,
    ) -> Self {
        Self {
            store,
            metadata,
            embedder,
            scorer: ImportanceScorer::new(),
            config: ManagerConfig::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: ImportanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying vector store, for the low-level vector API.
    pub fn store(&self) -> &IndexedVectorStore {
        &self.store
    }

    /// The metadata store, shared with the wire layer for API keys.
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Personas
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a persona after validating its configuration bounds.
    pub fn create_persona(
        &self,
        name: &str,
        description: Option<String>,
        system_prompt: Option<String>,
        config: PersonaConfig,
    ) -> Result<Persona> {
        if name.trim().is_empty() {
            return Err(MemoryError::Validation("persona name is empty".to_string()));
        }
        config.validate()?;

        let mut persona = Persona::new(name, config);
        persona.description = description;
        persona.system_prompt = system_prompt;
        self.metadata.put_persona(&persona)?;
        info!(persona_id = %persona.id, name = %persona.name, "persona created");
        Ok(persona)
    }

    pub fn get_persona(&self, id: PersonaId) -> Result<Persona> {
        self.metadata
            .get_persona(id)?
            .ok_or_else(|| MemoryError::NotFound(format!("persona {}", id)))
    }

    pub fn list_personas(&self) -> Result<Vec<Persona>> {
        self.metadata.list_personas()
    }

    pub fn update_persona(&self, persona: &Persona) -> Result<()> {
        persona.config.validate()?;
        self.metadata.update_persona(persona)
    }

    /// Delete a persona and everything it owns: metadata rows cascade in
    /// SQL, and the matching vectors are evicted from the store here.
    pub fn delete_persona(&self, id: PersonaId) -> Result<usize> {
        let cascaded = self.metadata.delete_persona(id)?;
        let mut evicted = 0usize;
        for memory_id in &cascaded {
            match self.store.delete_vector(*memory_id) {
                Ok(()) => evicted += 1,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(persona_id = %id, evicted, "persona deleted");
        Ok(evicted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memories
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a memory: embed, store the vector, persist the record, then
    /// enforce the persona's cap.
    ///
    /// The sequence rolls back on failure at any step; a vector without a
    /// record (or vice versa) never survives this call.
    pub fn add_memory(
        &self,
        persona_id: PersonaId,
        content: &str,
        ctx: MemoryContext,
    ) -> Result<MemoryRecord> {
        let persona = self.get_persona(persona_id)?;
        let record = self.insert_memory(&persona, content, &ctx)?;

        if self.metadata.count_active_memories(persona_id)? > persona.config.max_memory_size {
            self.enforce_memory_limits(persona_id)?;
        }
        Ok(record)
    }

    /// Embed and persist one memory without cap enforcement.
    fn insert_memory(
        &self,
        persona: &Persona,
        content: &str,
        ctx: &MemoryContext,
    ) -> Result<MemoryRecord> {
        ctx.deadline.check().map_err(MemoryError::from)?;
        if content.is_empty() {
            return Err(MemoryError::Validation("memory content is empty".to_string()));
        }
        if let Some(importance) = ctx.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(MemoryError::Validation(format!(
                    "importance {} out of range [0, 1]",
                    importance
                )));
            }
        }

        // Embedding happens outside the store lock and is retried on
        // transient provider failures.
        let embedder = &self.embedder;
        let embedding = self.with_retries(
            || embedder.embed(content),
            |e| e.is_transient(),
        )?;
        ctx.deadline.check().map_err(MemoryError::from)?;

        let mut record = MemoryRecord::new(
            persona.id,
            ctx.memory_type.unwrap_or(MemoryType::Fact),
            content,
            0.0,
        );
        record.conversation_id = ctx.conversation_id.clone();
        record.speaker = ctx.speaker;
        record.tags = ctx.tags.clone();
        record.context = ctx.context.clone();
        record.importance = match ctx.importance {
            Some(importance) => importance,
            None => self
                .scorer
                .score(&record, persona.system_prompt.as_deref(), record.created_at),
        };

        self.store
            .add_vector(record.id, &embedding, indexed_meta(&record))
            .map_err(|e| match e {
                StoreError::BufferFull { capacity } => MemoryError::Capacity(format!(
                    "vector buffer full (capacity {}); evict or clean up and retry",
                    capacity
                )),
                other => other.into(),
            })?;

        let put = self.with_retries(
            || self.metadata.put_memory_record(&record, Some(&embedding)),
            |e| matches!(e, MemoryError::Database(_)),
        );
        if let Err(e) = put {
            // Record write failed: take the vector back out so the caller
            // observes all-or-nothing insertion.
            if let Err(rollback) = self.store.delete_vector(record.id) {
                warn!(memory_id = %record.id, error = %rollback, "rollback failed");
            }
            return Err(e);
        }

        debug!(memory_id = %record.id, persona_id = %persona.id, "memory added");
        Ok(record)
    }

    /// Store a user/assistant turn pair as two linked conversation memories.
    ///
    /// Both land or neither does: if the assistant insert fails, the user
    /// insert is rolled back before the error surfaces.
    pub fn add_conversation_exchange(
        &self,
        persona_id: PersonaId,
        user_message: &str,
        assistant_message: &str,
        conversation_id: Option<String>,
    ) -> Result<ConversationExchange> {
        let persona = self.get_persona(persona_id)?;
        let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let user_ctx = MemoryContext {
            memory_type: Some(MemoryType::Conversation),
            conversation_id: Some(conversation_id.clone()),
            speaker: Some(Speaker::User),
            ..Default::default()
        };
        let user = self.insert_memory(&persona, user_message, &user_ctx)?;

        let assistant_ctx = MemoryContext {
            memory_type: Some(MemoryType::Conversation),
            conversation_id: Some(conversation_id.clone()),
            speaker: Some(Speaker::Assistant),
            ..Default::default()
        };
        let assistant = match self.insert_memory(&persona, assistant_message, &assistant_ctx) {
            Ok(record) => record,
            Err(e) => {
                self.remove_memory_quiet(user.id);
                return Err(e);
            }
        };

        if self.metadata.count_active_memories(persona_id)? > persona.config.max_memory_size {
            self.enforce_memory_limits(persona_id)?;
        }

        Ok(ConversationExchange {
            conversation_id,
            user,
            assistant,
        })
    }

    /// Semantic recall with score fusion.
    ///
    /// Embeds the query, over-fetches `2·limit` persona-scoped candidates
    /// from the vector store, enriches each with its record, fuses
    /// similarity with importance and recency, and returns the top `limit`
    /// by final score. Returned memories have their access counters touched.
    pub fn retrieve_relevant_memories(
        &self,
        persona_id: PersonaId,
        query: &str,
        options: &RecallOptions,
    ) -> Result<Vec<ScoredMemory>> {
        let _ = self.get_persona(persona_id)?;
        options.deadline.check().map_err(MemoryError::from)?;

        let embedder = &self.embedder;
        let query_vec = self.with_retries(|| embedder.embed(query), |e| e.is_transient())?;

        let now = Utc::now();
        let hits = self.store.search(
            &query_vec,
            &SearchOptions {
                limit: options.limit * 2,
                threshold: options.threshold,
                filters: SearchFilters {
                    persona_id: Some(persona_id.to_string()),
                    kinds: options
                        .memory_types
                        .iter()
                        .map(|t| t.as_str().to_string())
                        .collect(),
                    max_age_ms: options.max_age.map(|d| d.as_millis() as i64),
                    now_ms: now.timestamp_millis(),
                },
                deadline: options.deadline,
                ..Default::default()
            },
        )?;

        let mut scored = Vec::with_capacity(hits.len());
        for hit in hits {
            // A record can vanish between the search and this read; the hit
            // is simply dropped.
            let Some(record) = self.metadata.get_memory_record(hit.id)? else {
                continue;
            };
            let final_score = final_score(hit.similarity, &record, now);
            scored.push(ScoredMemory {
                record,
                similarity: hit.similarity,
                final_score,
            });
        }

        scored.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then(b.similarity.total_cmp(&a.similarity))
        });
        scored.truncate(options.limit);

        for memory in &scored {
            if let Err(e) = self.metadata.touch_memory(memory.record.id) {
                debug!(memory_id = %memory.record.id, error = %e, "touch failed");
            }
        }
        Ok(scored)
    }

    /// Memories in one conversation, oldest first.
    pub fn get_conversation_history(
        &self,
        persona_id: PersonaId,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let _ = self.get_persona(persona_id)?;
        self.metadata
            .list_conversation(persona_id, conversation_id, limit)
    }

    /// Fetch one memory record.
    pub fn get_memory(&self, id: VectorId) -> Result<MemoryRecord> {
        self.metadata
            .get_memory_record(id)?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {}", id)))
    }

    /// Delete one memory: record and vector.
    pub fn delete_memory(&self, id: VectorId) -> Result<()> {
        if !self.metadata.delete_memory_record(id)? {
            return Err(MemoryError::NotFound(format!("memory {}", id)));
        }
        match self.store.delete_vector(id) {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal used in rollback paths.
    fn remove_memory_quiet(&self, id: VectorId) {
        if let Err(e) = self.metadata.delete_memory_record(id) {
            warn!(memory_id = %id, error = %e, "rollback record delete failed");
        }
        if let Err(e) = self.store.delete_vector(id) {
            if !matches!(e, StoreError::NotFound(_)) {
                warn!(memory_id = %id, error = %e, "rollback vector delete failed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capacity and decay
    // ─────────────────────────────────────────────────────────────────────────

    /// Evict the least valuable memories until the persona is within its
    /// cap. Returns how many were evicted.
    pub fn enforce_memory_limits(&self, persona_id: PersonaId) -> Result<usize> {
        let persona = self.get_persona(persona_id)?;
        let active = self.metadata.count_active_memories(persona_id)?;
        if active <= persona.config.max_memory_size {
            return Ok(0);
        }
        let surplus = active - persona.config.max_memory_size;

        let records =
            self.metadata
                .list_by_persona(persona_id, &MemoryFilters::default(), active)?;
        let now = Utc::now();
        let decay = persona.config.memory_decay;

        let mut scored: Vec<(f32, MemoryRecord)> = records
            .into_iter()
            .map(|r| (eviction_score(&r, decay, now), r))
            .collect();
        // Highest eviction score goes first; ties fall to the older record.
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.1.created_at.cmp(&b.1.created_at))
        });

        let mut evicted = 0usize;
        for (score, record) in scored.into_iter().take(surplus) {
            debug!(
                memory_id = %record.id,
                evict_score = score,
                importance = record.importance,
                "evicting over-cap memory"
            );
            self.delete_memory(record.id)?;
            evicted += 1;
        }
        info!(persona_id = %persona_id, evicted, "memory limit enforced");
        Ok(evicted)
    }

    /// Decay pass over every persona.
    ///
    /// Removes memories older than their persona's decay time whose
    /// importance sits below the retention threshold; the perpetual tier
    /// (importance ≥ threshold) survives regardless of age.
    pub fn cleanup_expired_memories(&self) -> Result<usize> {
        let mut removed = 0usize;
        for persona in self.metadata.list_personas()? {
            removed += self.cleanup_persona(persona.id, None, &[], false)?.len();
        }
        if removed > 0 {
            info!(removed, "decay cleanup complete");
        }
        Ok(removed)
    }

    /// Targeted cleanup for one persona.
    ///
    /// `older_than` defaults to the persona's decay time; `types` empty
    /// means all types. With `dry_run` the doomed ids are returned but
    /// nothing is deleted. The retention threshold applies either way.
    pub fn cleanup_persona(
        &self,
        persona_id: PersonaId,
        older_than: Option<Duration>,
        types: &[MemoryType],
        dry_run: bool,
    ) -> Result<Vec<VectorId>> {
        let persona = self.get_persona(persona_id)?;
        let min_age = older_than.unwrap_or(persona.config.memory_decay);

        let total = self.metadata.count_active_memories(persona_id)?;
        let candidates = self.metadata.list_by_persona(
            persona_id,
            &MemoryFilters {
                memory_types: types.to_vec(),
                min_age: Some(min_age),
                ..Default::default()
            },
            total.max(1),
        )?;

        let doomed: Vec<VectorId> = candidates
            .into_iter()
            .filter(|r| r.importance < self.config.retention_threshold)
            .map(|r| r.id)
            .collect();

        if !dry_run {
            for id in &doomed {
                self.delete_memory(*id)?;
            }
        }
        Ok(doomed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Startup
    // ─────────────────────────────────────────────────────────────────────────

    /// Rebuild the vector store from the metadata keyspace.
    ///
    /// The buffer is never persisted; this walks every memory record,
    /// reinserting its stored embedding blob and re-embedding the content
    /// when the blob is missing or no longer matches the store's
    /// dimensionality.
    pub fn rebuild_from_metadata(&self) -> Result<usize> {
        let records = self.metadata.all_memory_records()?;
        let dims = self.store.dimensions();
        let mut restored = 0usize;

        for record in records {
            let embedding = match self.metadata.get_embedding(record.id)? {
                Some(stored) if stored.len() == dims => stored,
                _ => {
                    let embedder = &self.embedder;
                    let content = record.content.clone();
                    self.with_retries(|| embedder.embed(&content), |e| e.is_transient())?
                }
            };
            match self.store.add_vector(record.id, &embedding, indexed_meta(&record)) {
                Ok(()) => restored += 1,
                Err(StoreError::BufferFull { capacity }) => {
                    return Err(MemoryError::Capacity(format!(
                        "buffer (capacity {}) cannot hold the persisted corpus",
                        capacity
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(restored, "vector store rebuilt from metadata");
        Ok(restored)
    }

    /// Aggregate metrics across both stores.
    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            persona_count: self.metadata.count_personas()?,
            memory_count: self.metadata.count_memories()?,
            store: self.store.stats(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f`, retrying transient failures with bounded exponential
    /// backoff before surfacing the last error.
    fn with_retries<T>(
        &self,
        mut f: impl FnMut() -> Result<T>,
        is_transient: impl Fn(&MemoryError) -> bool,
    ) -> Result<T> {
        let mut delay = self.config.retry_base_delay;
        let mut last_err = None;
        for attempt in 0..self.config.retry_attempts.max(1) {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt + 1 < self.config.retry_attempts => {
                    warn!(attempt, error = %e, "transient failure, backing off");
                    std::thread::sleep(delay);
                    delay *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| MemoryError::Dependency("retries exhausted".to_string())))
    }
}

/// Indexed metadata for the vector store, derived from a record.
fn indexed_meta(record: &MemoryRecord) -> IndexedMeta {
    IndexedMeta {
        persona_id: Some(record.persona_id.to_string()),
        kind: Some(record.memory_type.as_str().to_string()),
        created_at_ms: record.created_at.timestamp_millis(),
    }
}

/// Fused retrieval score.
fn final_score(similarity: f32, record: &MemoryRecord, now: chrono::DateTime<Utc>) -> f32 {
    let age_hours = record.age(now).as_secs_f64() / 3600.0;
    let recency = (-(std::f64::consts::LN_2) * age_hours / RECENCY_HALF_LIFE_HOURS).exp() as f32;
    similarity + FINAL_IMPORTANCE_WEIGHT * record.importance + FINAL_RECENCY_WEIGHT * recency
}

/// Eviction score; higher means evict sooner.
fn eviction_score(record: &MemoryRecord, decay: Duration, now: chrono::DateTime<Utc>) -> f32 {
    let age = record.age(now);
    let age_fraction = if decay.as_secs() == 0 {
        1.0
    } else {
        (age.as_secs_f64() / decay.as_secs_f64()).clamp(0.0, 1.0) as f32
    };

    let hours_since_access = (now - record.last_accessed)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
        / 3600.0;
    let recent_access =
        (-(std::f64::consts::LN_2) * hours_since_access / ACCESS_HALF_LIFE_HOURS).exp() as f32;

    EVICT_IMPORTANCE_WEIGHT * (1.0 - record.importance)
        + EVICT_AGE_WEIGHT * age_fraction
        + EVICT_ACCESS_WEIGHT * (1.0 - recent_access)
}
