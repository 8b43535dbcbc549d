//! Persona and memory record types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reverie_core::VectorId;

use crate::error::{MemoryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Persona
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier for a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(pub Uuid);

impl PersonaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| MemoryError::Validation(format!("invalid persona id '{}': {}", s, e)))
    }
}

impl Default for PersonaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bounds on persona configuration.
pub const MAX_MEMORY_SIZE_MIN: usize = 10;
pub const MAX_MEMORY_SIZE_MAX: usize = 10_000;
pub const MEMORY_DECAY_MIN: Duration = Duration::from_secs(60);
pub const MEMORY_DECAY_MAX: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Per-persona memory policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Hard cap on active memories; exceeding it triggers eviction.
    pub max_memory_size: usize,
    /// Age past which a low-importance memory becomes eligible for decay
    /// cleanup.
    pub memory_decay: Duration,
    /// Preferred embedding model, when the persona overrides the default.
    pub embedding_model: Option<String>,
}

impl PersonaConfig {
    /// Validate bounds: `max_memory_size` in [10, 10000], decay between one
    /// minute and one year.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_size < MAX_MEMORY_SIZE_MIN
            || self.max_memory_size > MAX_MEMORY_SIZE_MAX
        {
            return Err(MemoryError::Validation(format!(
                "max_memory_size {} out of range [{}, {}]",
                self.max_memory_size, MAX_MEMORY_SIZE_MIN, MAX_MEMORY_SIZE_MAX
            )));
        }
        if self.memory_decay < MEMORY_DECAY_MIN || self.memory_decay > MEMORY_DECAY_MAX {
            return Err(MemoryError::Validation(format!(
                "memory_decay {:?} out of range [{:?}, {:?}]",
                self.memory_decay, MEMORY_DECAY_MIN, MEMORY_DECAY_MAX
            )));
        }
        Ok(())
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            max_memory_size: 1000,
            memory_decay: Duration::from_secs(30 * 24 * 60 * 60),
            embedding_model: None,
        }
    }
}

/// A named container of memories with its own capacity and decay policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub config: PersonaConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    /// Create a persona with the given name and config.
    pub fn new(name: impl Into<String>, config: PersonaConfig) -> Self {
        let now = Utc::now();
        Self {
            id: PersonaId::new(),
            name: name.into(),
            description: None,
            system_prompt: None,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory records
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a stored memory.
///
/// The same enum backs both records and search filters, so the sets can
/// never drift apart at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Conversation,
    Fact,
    Preference,
    Context,
    System,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Context => "context",
            MemoryType::System => "system",
        }
    }

    /// Parse a memory type, rejecting unknown values.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "conversation" => Ok(MemoryType::Conversation),
            "fact" => Ok(MemoryType::Fact),
            "preference" => Ok(MemoryType::Preference),
            "context" => Ok(MemoryType::Context),
            "system" => Ok(MemoryType::System),
            other => Err(MemoryError::Validation(format!(
                "unknown memory type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who spoke in a conversation memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Speaker::User),
            "assistant" => Ok(Speaker::Assistant),
            other => Err(MemoryError::Validation(format!(
                "unknown speaker '{}'",
                other
            ))),
        }
    }
}

/// One memory, as persisted in the metadata store.
///
/// The vector itself lives in the indexed store; `id` ties the two together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: VectorId,
    pub persona_id: PersonaId,
    pub memory_type: MemoryType,
    /// Weight in [0, 1]; high-importance memories survive decay cleanup.
    pub importance: f32,
    /// The original text that was embedded, so retrieval returns human
    /// language rather than vectors.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    pub conversation_id: Option<String>,
    pub speaker: Option<Speaker>,
    pub tags: Vec<String>,
    /// Free-form context supplied at insertion.
    pub context: Option<serde_json::Value>,
}

impl MemoryRecord {
    pub fn new(
        persona_id: PersonaId,
        memory_type: MemoryType,
        content: impl Into<String>,
        importance: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: VectorId::new(),
            persona_id,
            memory_type,
            importance,
            content: content.into(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            conversation_id: None,
            speaker: None,
            tags: Vec::new(),
            context: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>, speaker: Speaker) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self.speaker = Some(speaker);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Age relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Partial update applied to a memory record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub importance: Option<f32>,
    pub tags: Option<Vec<String>>,
    pub context: Option<serde_json::Value>,
}

/// Filters for listing a persona's memories.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    /// Keep only these types; empty keeps all.
    pub memory_types: Vec<MemoryType>,
    /// Keep only memories younger than this.
    pub max_age: Option<Duration>,
    /// Keep only memories older than this.
    pub min_age: Option<Duration>,
    /// Keep only memories in this conversation.
    pub conversation_id: Option<String>,
}

/// A retrieved memory with its ranking scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Raw similarity from the vector store.
    pub similarity: f32,
    /// Fused score: similarity + importance and recency boosts.
    pub final_score: f32,
}

/// Aggregate metrics for the memory layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub persona_count: usize,
    pub memory_count: usize,
    pub store: reverie_core::StoreStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_config_bounds() {
        let mut config = PersonaConfig::default();
        assert!(config.validate().is_ok());

        config.max_memory_size = 5;
        assert!(config.validate().is_err());
        config.max_memory_size = 20_000;
        assert!(config.validate().is_err());
        config.max_memory_size = 10;
        assert!(config.validate().is_ok());

        config.memory_decay = Duration::from_secs(30);
        assert!(config.validate().is_err());
        config.memory_decay = Duration::from_secs(400 * 24 * 60 * 60);
        assert!(config.validate().is_err());
        config.memory_decay = Duration::from_secs(3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_type_roundtrip() {
        for t in [
            MemoryType::Conversation,
            MemoryType::Fact,
            MemoryType::Preference,
            MemoryType::Context,
            MemoryType::System,
        ] {
            assert_eq!(MemoryType::from_str(t.as_str()).unwrap(), t);
        }
        assert!(MemoryType::from_str("dream").is_err());
    }

    #[test]
    fn test_speaker_roundtrip() {
        assert_eq!(Speaker::from_str("user").unwrap(), Speaker::User);
        assert_eq!(Speaker::from_str("assistant").unwrap(), Speaker::Assistant);
        assert!(Speaker::from_str("narrator").is_err());
    }

    #[test]
    fn test_record_builder() {
        let persona = PersonaId::new();
        let record = MemoryRecord::new(persona, MemoryType::Conversation, "hello", 0.5)
            .with_conversation("conv-1", Speaker::User)
            .with_tags(vec!["greeting".to_string()]);

        assert_eq!(record.persona_id, persona);
        assert_eq!(record.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(record.speaker, Some(Speaker::User));
        assert_eq!(record.tags, vec!["greeting"]);
    }

    #[test]
    fn test_record_age() {
        let record = MemoryRecord::new(PersonaId::new(), MemoryType::Fact, "x", 0.5);
        let later = record.created_at + chrono::Duration::hours(2);
        assert_eq!(record.age(later), Duration::from_secs(7200));
        // Clock skew never yields a negative age.
        let earlier = record.created_at - chrono::Duration::hours(1);
        assert_eq!(record.age(earlier), Duration::ZERO);
    }
}
