//! Engine configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use reverie_core::{DistanceMetric, IndexKind};

use crate::error::{ApiError, Result};

/// Default buffer budget in megabytes.
pub const DEFAULT_MAX_MEMORY_MB: usize = 512;

/// Default vector dimensionality.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// Default rate-limit window.
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Default requests allowed per window.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 120;

/// Default cost factor for API key hashing (2^n iterations).
pub const DEFAULT_API_KEY_SALT_ROUNDS: u32 = 12;

/// Runtime configuration for the engine and its HTTP surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,
    /// Path of the metadata database file.
    pub db_path: PathBuf,
    /// Sizes the vector buffer.
    pub max_memory_mb: usize,
    /// Dimensionality for the buffer and the default embedding target.
    pub dimensions: usize,
    /// `hnsw` or `flat`.
    pub index_type: IndexKind,
    /// `cosine`, `euclidean`, or `dot`.
    pub distance_metric: DistanceMetric,
    /// Safety cap on capacity.
    pub max_vectors: Option<usize>,
    /// Global limiter window.
    pub rate_limit_window_ms: u64,
    /// Global limiter quota per window.
    pub rate_limit_max_requests: u32,
    /// Cost factor for hashing issued API keys (2^n iterations).
    pub api_key_salt_rounds: u32,
    /// `openai`, `local`, or `mock`.
    pub embedding_provider: String,
    /// Model name passed to the provider.
    pub embedding_model: Option<String>,
    /// Filtering threshold for logs.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".parse().unwrap(),
            db_path: PathBuf::from("reverie.db"),
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            dimensions: DEFAULT_DIMENSIONS,
            index_type: IndexKind::Hnsw,
            distance_metric: DistanceMetric::Cosine,
            max_vectors: None,
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            api_key_salt_rounds: DEFAULT_API_KEY_SALT_ROUNDS,
            embedding_provider: "openai".to_string(),
            embedding_model: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from `REVERIE_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are validation
    /// errors at startup rather than silent fallbacks.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_var("REVERIE_BIND_ADDRESS") {
            config.bind_address = v
                .parse()
                .map_err(|_| ApiError::Validation(format!("bad REVERIE_BIND_ADDRESS '{}'", v)))?;
        }
        if let Some(v) = env_var("REVERIE_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("REVERIE_MAX_MEMORY_MB") {
            config.max_memory_mb = parse_number(&v, "REVERIE_MAX_MEMORY_MB")?;
        }
        if let Some(v) = env_var("REVERIE_DIMENSIONS") {
            config.dimensions = parse_number(&v, "REVERIE_DIMENSIONS")?;
        }
        if let Some(v) = env_var("REVERIE_INDEX_TYPE") {
            config.index_type = IndexKind::from_str(&v)
                .map_err(|e| ApiError::Validation(format!("REVERIE_INDEX_TYPE: {}", e)))?;
        }
        if let Some(v) = env_var("REVERIE_DISTANCE_METRIC") {
            config.distance_metric = DistanceMetric::from_str(&v)
                .map_err(|e| ApiError::Validation(format!("REVERIE_DISTANCE_METRIC: {}", e)))?;
        }
        if let Some(v) = env_var("REVERIE_MAX_VECTORS") {
            config.max_vectors = Some(parse_number(&v, "REVERIE_MAX_VECTORS")?);
        }
        if let Some(v) = env_var("REVERIE_RATE_LIMIT_WINDOW_MS") {
            config.rate_limit_window_ms = parse_number(&v, "REVERIE_RATE_LIMIT_WINDOW_MS")?;
        }
        if let Some(v) = env_var("REVERIE_RATE_LIMIT_MAX_REQUESTS") {
            config.rate_limit_max_requests = parse_number(&v, "REVERIE_RATE_LIMIT_MAX_REQUESTS")?;
        }
        if let Some(v) = env_var("REVERIE_API_KEY_SALT_ROUNDS") {
            let rounds: u32 = parse_number(&v, "REVERIE_API_KEY_SALT_ROUNDS")?;
            if !(4..=31).contains(&rounds) {
                return Err(ApiError::Validation(format!(
                    "REVERIE_API_KEY_SALT_ROUNDS {} out of range [4, 31]",
                    rounds
                )));
            }
            config.api_key_salt_rounds = rounds;
        }
        if let Some(v) = env_var("REVERIE_EMBEDDING_PROVIDER") {
            match v.as_str() {
                "openai" | "local" | "mock" => config.embedding_provider = v,
                other => {
                    return Err(ApiError::Validation(format!(
                        "unknown REVERIE_EMBEDDING_PROVIDER '{}'",
                        other
                    )))
                }
            }
        }
        if let Some(v) = env_var("REVERIE_EMBEDDING_MODEL") {
            config.embedding_model = Some(v);
        }
        if let Some(v) = env_var("REVERIE_LOG_LEVEL") {
            config.log_level = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate derived constraints.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(ApiError::Validation("dimensions must be non-zero".to_string()));
        }
        if self.max_memory_mb == 0 {
            return Err(ApiError::Validation(
                "max_memory_mb must be non-zero".to_string(),
            ));
        }
        if self.rate_limit_max_requests == 0 {
            return Err(ApiError::Validation(
                "rate_limit_max_requests must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Buffer budget in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }

    /// Store configuration derived from this engine config.
    pub fn store_config(&self) -> reverie_core::StoreConfig {
        reverie_core::StoreConfig {
            max_memory_bytes: self.max_memory_bytes(),
            dimensions: self.dimensions,
            metric: self.distance_metric,
            index: self.index_type,
            max_vectors: self.max_vectors,
            ..Default::default()
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ApiError::Validation(format!("bad {} '{}'", name, value)))
}
