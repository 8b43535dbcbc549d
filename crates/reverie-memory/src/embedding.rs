//! Embedding providers.
//!
//! The memory manager converts text to vectors through the
//! [`EmbeddingProvider`] trait. The trait is synchronous: the core never
//! awaits, embedding calls happen outside the store lock, and the async
//! wire layer bridges with `spawn_blocking`.
//!
//! # Implementations
//!
//! - [`MockEmbedder`]: deterministic unit vectors for tests
//! - [`LocalHashEmbedder`]: the hash-based dev fallback; never for production
//! - [`OpenAiEmbedder`]: OpenAI's embeddings API over a blocking client

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{MemoryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Provider Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Converts text into a dense vector of the provider's declared
/// dimensionality.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Provider name, for logs and stats.
    fn name(&self) -> &str;
}

/// A shared embedder usable across threads.
pub type SharedEmbedder = Arc<dyn EmbeddingProvider>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic embedder for tests.
///
/// Hashes the text into a seed and expands it into a unit vector, so equal
/// texts always embed equally and similarity math stays meaningful without
/// any model.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_embedding(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Expand a text hash into a pseudo-random unit vector.
fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut state = djb2(text);
    let mut embedding = vec![0.0f32; dimensions];
    for value in embedding.iter_mut() {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        *value = ((state >> 16) & 0x7fff) as f32 / 16384.0 - 1.0;
    }

    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }
    embedding
}

fn djb2(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

// ─────────────────────────────────────────────────────────────────────────────
// Local Hash Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Offline fallback that embeds by hashing.
///
/// Produces stable vectors with no semantic content at all; retrieval over
/// them is exact-match-ish rather than semantic. Exists so development and
/// CI can run without network access. Must not be used in production, and
/// says so on construction.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    dimensions: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        warn!(
            dimensions,
            "local hash embedder active: vectors carry no semantics; dev/test only"
        );
        Self { dimensions }
    }
}

impl EmbeddingProvider for LocalHashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_embedding(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "local"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for OpenAI embeddings.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            MemoryError::Validation("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// OpenAI embeddings API client.
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    config: OpenAiEmbedderConfig,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                MemoryError::Dependency(format!("failed to create HTTP client: {}", e))
            })?;

        let dimensions = match config.model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        };

        Ok(Self {
            client,
            config,
            dimensions,
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url)
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .client
            .post(self.embeddings_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| MemoryError::Dependency(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MemoryError::Dependency(format!(
                "embedding request failed: HTTP {} - {}",
                status, body
            )));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .map_err(|e| MemoryError::Dependency(format!("bad embedding response: {}", e)))?;

        result.data.sort_by_key(|e| e.index);
        result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| MemoryError::Dependency("no embedding returned".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Build a shared embedder from configuration.
///
/// `provider` is one of `openai`, `local`, or `mock`; anything else is a
/// validation error. The local provider is a dev aid and is never chosen
/// implicitly.
pub fn build_embedder(
    provider: &str,
    model: Option<&str>,
    dimensions: usize,
) -> Result<SharedEmbedder> {
    match provider {
        "openai" => {
            let mut config = OpenAiEmbedderConfig::from_env()?;
            if let Some(model) = model {
                config = config.with_model(model);
            }
            Ok(Arc::new(OpenAiEmbedder::new(config)?))
        }
        "local" => Ok(Arc::new(LocalHashEmbedder::new(dimensions))),
        "mock" => Ok(Arc::new(MockEmbedder::new(dimensions))),
        other => Err(MemoryError::Validation(format!(
            "unknown embedding provider '{}' (expected openai, local, or mock)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_embedder_unit_length() {
        let embedder = MockEmbedder::new(384);
        let v = embedder.embed("hello world").unwrap();
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(64);
        assert_eq!(
            embedder.embed("same text").unwrap(),
            embedder.embed("same text").unwrap()
        );
        assert_ne!(
            embedder.embed("one text").unwrap(),
            embedder.embed("another text").unwrap()
        );
    }

    #[test]
    fn test_local_matches_mock_function() {
        // Both ride the same hash expansion; local only differs in intent.
        let local = LocalHashEmbedder::new(32);
        let mock = MockEmbedder::new(32);
        assert_eq!(local.embed("x").unwrap(), mock.embed("x").unwrap());
        assert_eq!(local.name(), "local");
    }

    #[test]
    fn test_openai_config_defaults() {
        let config = OpenAiEmbedderConfig::new("test-key");
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.base_url, "https://api.openai.com/v1");

        let config = config
            .with_model("text-embedding-3-large")
            .with_base_url("http://localhost:9999");
        assert_eq!(config.model, "text-embedding-3-large");
        assert_eq!(config.base_url, "http://localhost:9999");
    }

    #[test]
    fn test_openai_dimension_table() {
        let small = OpenAiEmbedder::new(OpenAiEmbedderConfig::new("k")).unwrap();
        assert_eq!(small.dimensions(), 1536);

        let large = OpenAiEmbedder::new(
            OpenAiEmbedderConfig::new("k").with_model("text-embedding-3-large"),
        )
        .unwrap();
        assert_eq!(large.dimensions(), 3072);
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        assert!(build_embedder("quantum", None, 16).is_err());
    }

    #[test]
    fn test_factory_builds_mock_and_local() {
        let mock = build_embedder("mock", None, 16).unwrap();
        assert_eq!(mock.dimensions(), 16);
        let local = build_embedder("local", None, 16).unwrap();
        assert_eq!(local.name(), "local");
    }
}
