//! Route handlers.

mod health;
mod memories;
mod personas;
mod vectors;

pub use health::{health_handler, stats_handler};
pub use memories::{
    add_memory_handler, cleanup_handler, conversation_handler, conversation_history_handler,
    search_memories_handler,
};
pub use personas::{
    create_persona_handler, delete_persona_handler, get_persona_handler, list_personas_handler,
    update_persona_handler,
};
pub use vectors::{
    add_vector_handler, delete_vector_handler, get_vector_handler, search_vectors_handler,
    update_vector_handler,
};

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;

use crate::error::ApiError;

/// JSON extractor that reports body problems as validation errors.
///
/// Axum's stock `Json` rejects malformed bodies with 422; the wire contract
/// maps every shape failure (bad JSON, unknown fields, wrong types) to a
/// 400 validation error instead.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(ValidJson(value))
    }
}

/// Run a synchronous manager call off the async runtime.
///
/// The core never awaits; handlers bridge through `spawn_blocking` so SQL
/// and embedding calls never stall the executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {}", e)))?
}
