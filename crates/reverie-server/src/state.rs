//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use reverie_memory::{MetadataStore, PersonaMemoryManager};

use crate::config::EngineConfig;
use crate::ratelimit::RateLimiterRegistry;

/// Shared state: the memory manager, its metadata store, configuration, and
/// the per-key rate limiters.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<PersonaMemoryManager>,
    config: Arc<EngineConfig>,
    limiters: Arc<RateLimiterRegistry>,
}

impl AppState {
    pub fn new(manager: PersonaMemoryManager, config: EngineConfig) -> Self {
        let limiters = RateLimiterRegistry::new(
            Duration::from_millis(config.rate_limit_window_ms),
            config.rate_limit_max_requests,
        );
        Self {
            manager: Arc::new(manager),
            config: Arc::new(config),
            limiters: Arc::new(limiters),
        }
    }

    pub fn manager(&self) -> &Arc<PersonaMemoryManager> {
        &self.manager
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        self.manager.metadata()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }
}
