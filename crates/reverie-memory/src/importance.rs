//! Importance scoring for memories inserted without an explicit weight.
//!
//! The score blends four signals: recency (exponential decay), access
//! frequency (capped), emotional significance, and contextual relevance.
//! The last two come from pluggable analyzers; without one wired in they
//! contribute a neutral 0.5.

use chrono::{DateTime, Utc};

use crate::types::MemoryRecord;

/// Blend weights: recency / frequency / emotional / contextual.
const WEIGHT_RECENCY: f32 = 0.3;
const WEIGHT_FREQUENCY: f32 = 0.3;
const WEIGHT_EMOTIONAL: f32 = 0.2;
const WEIGHT_CONTEXTUAL: f32 = 0.2;

/// Access counts above this saturate the frequency signal.
const FREQUENCY_CAP: u32 = 10;

/// Recency half-life for the importance signal, in hours.
const RECENCY_HALF_LIFE_HOURS: f64 = 24.0;

/// Analyzer for the emotional-significance signal (sentiment magnitude;
/// neutral content scores 0).
pub trait EmotionalAnalyzer: Send + Sync {
    fn score(&self, content: &str) -> f32;
}

/// Analyzer for contextual relevance (similarity to the persona's system
/// prompt or the caller-provided query context).
pub trait RelevanceAnalyzer: Send + Sync {
    fn score(&self, content: &str, context: Option<&str>) -> f32;
}

/// Weighted importance scorer.
#[derive(Default)]
pub struct ImportanceScorer {
    emotional: Option<Box<dyn EmotionalAnalyzer>>,
    relevance: Option<Box<dyn RelevanceAnalyzer>>,
}

impl ImportanceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_emotional(mut self, analyzer: Box<dyn EmotionalAnalyzer>) -> Self {
        self.emotional = Some(analyzer);
        self
    }

    pub fn with_relevance(mut self, analyzer: Box<dyn RelevanceAnalyzer>) -> Self {
        self.relevance = Some(analyzer);
        self
    }

    /// Score a record's importance in [0, 1].
    pub fn score(&self, record: &MemoryRecord, context: Option<&str>, now: DateTime<Utc>) -> f32 {
        let age_hours = record.age(now).as_secs_f64() / 3600.0;
        let recency = (-(std::f64::consts::LN_2) * age_hours / RECENCY_HALF_LIFE_HOURS).exp() as f32;

        let frequency = record.access_count.min(FREQUENCY_CAP) as f32 / FREQUENCY_CAP as f32;

        let emotional = self
            .emotional
            .as_ref()
            .map(|a| a.score(&record.content))
            .unwrap_or(0.5);
        let contextual = self
            .relevance
            .as_ref()
            .map(|a| a.score(&record.content, context))
            .unwrap_or(0.5);

        let score = WEIGHT_RECENCY * recency
            + WEIGHT_FREQUENCY * frequency
            + WEIGHT_EMOTIONAL * emotional
            + WEIGHT_CONTEXTUAL * contextual;
        score.clamp(0.0, 1.0)
    }
}
