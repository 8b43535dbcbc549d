//! Core identifier, metric, and deadline types.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// VectorId
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque 128-bit identifier for a stored vector.
///
/// Assigned at insertion and stable for the vector's lifetime. Never reused
/// after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorId(pub Uuid);

impl VectorId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| StoreError::Validation(format!("invalid vector id '{}': {}", s, e)))
    }
}

impl Default for VectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distance Metric
// ─────────────────────────────────────────────────────────────────────────────

/// Distance metric used for similarity ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity; reported directly in [-1, 1].
    Cosine,
    /// Euclidean distance, mapped to similarity as `1 / (1 + d)`.
    Euclidean,
    /// Raw dot product; reported directly.
    Dot,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Dot => "dot",
        }
    }

    /// Parse a metric name, rejecting unknown values.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "dot" => Ok(DistanceMetric::Dot),
            other => Err(StoreError::Validation(format!(
                "unknown distance metric '{}' (expected cosine, euclidean, or dot)",
                other
            ))),
        }
    }
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deadline
// ─────────────────────────────────────────────────────────────────────────────

/// Wall-clock budget for a single public operation.
///
/// Checked at operation boundaries (per candidate batch during search, per
/// record during cleanup). Exceeding the deadline fails the operation with
/// [`StoreError::DeadlineExceeded`]; partially applied work is rolled back
/// the same way as any other mid-operation failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; the operation runs to completion.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    /// Deadline `millis` milliseconds from now.
    pub fn in_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Fail with `DeadlineExceeded` if the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(StoreError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Usage metrics for the vector buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStats {
    /// Total slots the buffer was sized for.
    pub capacity: usize,
    /// Occupied slots.
    pub in_use: usize,
    /// Slots available (free list plus never-used).
    pub free: usize,
    /// Configured vector dimensionality.
    pub dimensions: usize,
    /// Bytes allocated for the flat buffer.
    pub bytes_allocated: usize,
    /// Bytes of vector data currently live.
    pub bytes_in_use: usize,
}

/// Usage metrics for the indexed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Buffer metrics.
    pub buffer: BufferStats,
    /// Nodes in the ANN index.
    pub indexed: usize,
    /// Level of the index entry point, if any.
    pub entry_level: Option<usize>,
    /// Configured metric.
    pub metric: DistanceMetric,
}
