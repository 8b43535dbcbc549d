//! Persona CRUD endpoints.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use reverie_memory::{Permission, Persona, PersonaConfig, PersonaId};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;

use super::{blocking, ValidJson};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request to create a persona. Unknown fields are rejected.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreatePersonaRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Hard cap on active memories, in [10, 10000].
    #[serde(default)]
    pub max_memory_size: Option<usize>,
    /// Decay time in milliseconds, between one minute and one year.
    #[serde(default)]
    pub memory_decay_time: Option<u64>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

/// Request to update a persona. Absent fields keep their values.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdatePersonaRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_memory_size: Option<usize>,
    #[serde(default)]
    pub memory_decay_time: Option<u64>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

/// Wire representation of a persona.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersonaView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_memory_size: usize,
    /// Decay time in milliseconds.
    pub memory_decay_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Persona> for PersonaView {
    fn from(p: Persona) -> Self {
        Self {
            id: p.id.to_string(),
            name: p.name,
            description: p.description,
            system_prompt: p.system_prompt,
            max_memory_size: p.config.max_memory_size,
            memory_decay_time: p.config.memory_decay.as_millis() as u64,
            embedding_model: p.config.embedding_model,
            created_at: p.created_at.to_rfc3339(),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

pub(crate) fn parse_persona_id(raw: &str) -> Result<PersonaId, ApiError> {
    PersonaId::parse(raw).map_err(|_| ApiError::Validation(format!("invalid persona id '{}'", raw)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/personas - create a persona.
#[utoipa::path(
    post,
    path = "/api/personas",
    request_body = CreatePersonaRequest,
    responses(
        (status = 201, description = "Persona created", body = PersonaView),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Missing personas:write scope"),
    ),
    security(("api_key" = [])),
    tag = "personas"
)]
pub async fn create_persona_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<CreatePersonaRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PersonaView>>), ApiError> {
    auth.require(Permission::PersonasWrite)?;

    let manager = state.manager().clone();
    let persona = blocking(move || {
        let defaults = PersonaConfig::default();
        let config = PersonaConfig {
            max_memory_size: request.max_memory_size.unwrap_or(defaults.max_memory_size),
            memory_decay: request
                .memory_decay_time
                .map(Duration::from_millis)
                .unwrap_or(defaults.memory_decay),
            embedding_model: request.embedding_model,
        };
        manager
            .create_persona(
                &request.name,
                request.description,
                request.system_prompt,
                config,
            )
            .map_err(ApiError::from)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::success(PersonaView::from(persona)),
    ))
}

/// GET /api/personas - list personas.
#[utoipa::path(
    get,
    path = "/api/personas",
    responses((status = 200, description = "All personas", body = [PersonaView])),
    security(("api_key" = [])),
    tag = "personas"
)]
pub async fn list_personas_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ApiResponse<Vec<PersonaView>>>, ApiError> {
    auth.require(Permission::PersonasRead)?;

    let manager = state.manager().clone();
    let personas = blocking(move || manager.list_personas().map_err(ApiError::from)).await?;
    Ok(ApiResponse::success(
        personas.into_iter().map(PersonaView::from).collect(),
    ))
}

/// GET /api/personas/{id} - fetch one persona.
#[utoipa::path(
    get,
    path = "/api/personas/{id}",
    params(("id" = String, Path, description = "Persona id")),
    responses(
        (status = 200, description = "The persona", body = PersonaView),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "personas"
)]
pub async fn get_persona_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PersonaView>>, ApiError> {
    auth.require(Permission::PersonasRead)?;
    let persona_id = parse_persona_id(&id)?;

    let manager = state.manager().clone();
    let persona =
        blocking(move || manager.get_persona(persona_id).map_err(ApiError::from)).await?;
    Ok(ApiResponse::success(PersonaView::from(persona)))
}

/// PUT /api/personas/{id} - update a persona.
#[utoipa::path(
    put,
    path = "/api/personas/{id}",
    params(("id" = String, Path, description = "Persona id")),
    request_body = UpdatePersonaRequest,
    responses(
        (status = 200, description = "Updated persona", body = PersonaView),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "personas"
)]
pub async fn update_persona_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<UpdatePersonaRequest>,
) -> Result<Json<ApiResponse<PersonaView>>, ApiError> {
    auth.require(Permission::PersonasWrite)?;
    let persona_id = parse_persona_id(&id)?;

    let manager = state.manager().clone();
    let persona = blocking(move || {
        let mut persona = manager.get_persona(persona_id)?;
        if let Some(name) = request.name {
            persona.name = name;
        }
        if let Some(description) = request.description {
            persona.description = Some(description);
        }
        if let Some(prompt) = request.system_prompt {
            persona.system_prompt = Some(prompt);
        }
        if let Some(max) = request.max_memory_size {
            persona.config.max_memory_size = max;
        }
        if let Some(decay_ms) = request.memory_decay_time {
            persona.config.memory_decay = Duration::from_millis(decay_ms);
        }
        if let Some(model) = request.embedding_model {
            persona.config.embedding_model = Some(model);
        }
        manager.update_persona(&persona)?;
        Ok(persona)
    })
    .await?;

    Ok(ApiResponse::success(PersonaView::from(persona)))
}

/// DELETE /api/personas/{id} - delete a persona and all its memories.
#[utoipa::path(
    delete,
    path = "/api/personas/{id}",
    params(("id" = String, Path, description = "Persona id")),
    responses(
        (status = 200, description = "Persona deleted"),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "personas"
)]
pub async fn delete_persona_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    auth.require(Permission::PersonasWrite)?;
    let persona_id = parse_persona_id(&id)?;

    let manager = state.manager().clone();
    let evicted =
        blocking(move || manager.delete_persona(persona_id).map_err(ApiError::from)).await?;
    Ok(ApiResponse::success(serde_json::json!({
        "deleted": id,
        "memoriesRemoved": evicted,
    })))
}
