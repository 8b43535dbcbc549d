//! HTTP API for the Reverie vector-memory engine.
//!
//! This crate is the wire layer: axum routes over the synchronous
//! [`PersonaMemoryManager`](reverie_memory::PersonaMemoryManager), API-key
//! authentication against the hashed key store, per-key rate limiting, and
//! the uniform response envelope. All async framing lives here; the core
//! underneath never awaits.
//!
//! # Example
//!
//! ```ignore
//! use reverie_server::{EngineConfig, Server};
//!
//! let config = EngineConfig::from_env()?;
//! let server = Server::build(config)?;
//! server.run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod routes;
pub mod state;

pub use auth::{auth_middleware, generate_key, AuthContext, API_KEY_HEADER};
pub use config::EngineConfig;
pub use error::{ApiError, ApiResponse, Result};
pub use state::AppState;

use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use reverie_core::IndexedVectorStore;
use reverie_memory::{build_embedder, MetadataStore, PersonaMemoryManager};

/// The Reverie HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Build the full engine from configuration: open the metadata store
    /// (running migrations), construct the embedder and the vector store,
    /// and rebuild the buffer from the persisted memory keyspace.
    pub fn build(config: EngineConfig) -> Result<Self> {
        let metadata = Arc::new(
            MetadataStore::open(&config.db_path).map_err(ApiError::from)?,
        );
        let embedder = build_embedder(
            &config.embedding_provider,
            config.embedding_model.as_deref(),
            config.dimensions,
        )
        .map_err(ApiError::from)?;
        let store = IndexedVectorStore::new(config.store_config()).map_err(ApiError::from)?;

        let manager = PersonaMemoryManager::new(store, metadata, embedder);
        let restored = manager.rebuild_from_metadata().map_err(ApiError::from)?;
        info!(restored, "engine ready");

        Ok(Self {
            state: AppState::new(manager, config),
        })
    }

    /// Wrap an already-built state (tests wire mock embedders this way).
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        Router::new()
            // Liveness, no auth.
            .route("/health", get(routes::health_handler))
            .nest("/api", self.api_routes())
            .layer(middleware::from_fn(ratelimit::request_logging_middleware))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Authenticated API routes.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        Router::new()
            .route("/stats", get(routes::stats_handler))
            // Personas
            .route(
                "/personas",
                post(routes::create_persona_handler).get(routes::list_personas_handler),
            )
            .route(
                "/personas/{id}",
                get(routes::get_persona_handler)
                    .put(routes::update_persona_handler)
                    .delete(routes::delete_persona_handler),
            )
            // Memories
            .route(
                "/personas/{id}/memories",
                post(routes::add_memory_handler),
            )
            .route(
                "/personas/{id}/memories/search",
                post(routes::search_memories_handler),
            )
            .route(
                "/personas/{id}/conversations",
                post(routes::conversation_handler),
            )
            .route(
                "/personas/{id}/conversations/{conversation_id}",
                get(routes::conversation_history_handler),
            )
            .route("/personas/{id}/cleanup", post(routes::cleanup_handler))
            // Raw vectors
            .route(
                "/vectors",
                post(routes::add_vector_handler),
            )
            .route("/vectors/search", post(routes::search_vectors_handler))
            .route(
                "/vectors/{id}",
                get(routes::get_vector_handler)
                    .put(routes::update_vector_handler)
                    .delete(routes::delete_vector_handler),
            )
            // Rate limiting runs after auth so the key id is available.
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                ratelimit::rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
    }

    /// Bind and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config().bind_address;
        let router = self.router();

        info!("Starting server on {}", addr);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to bind {}: {}", addr, e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| ApiError::Internal(format!("server error: {}", e)))?;
        Ok(())
    }
}
