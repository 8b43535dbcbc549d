//! Persona memory endpoints: add, search, conversations, cleanup.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use reverie_memory::{
    MemoryContext, MemoryRecord, MemoryType, Permission, RecallOptions, ScoredMemory,
};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;

use super::{blocking, ValidJson};
use super::personas::parse_persona_id;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request to add a memory. Unknown fields are rejected.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddMemoryRequest {
    pub content: String,
    /// One of `conversation`, `fact`, `preference`, `context`, `system`.
    #[serde(rename = "type")]
    pub memory_type: String,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// Request for semantic recall.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchMemoriesRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub memory_types: Option<Vec<String>>,
    /// Maximum memory age in milliseconds.
    #[serde(default)]
    pub max_age: Option<u64>,
    /// Attach the stored free-form context to each hit.
    #[serde(default)]
    pub include_context: bool,
}

/// Request to store one conversation turn pair.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConversationRequest {
    pub user_message: String,
    pub assistant_response: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Request for targeted cleanup.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CleanupRequest {
    /// Age floor in milliseconds; defaults to the persona's decay time.
    #[serde(default)]
    pub older_than: Option<u64>,
    #[serde(default)]
    pub memory_types: Option<Vec<String>>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Query params for conversation history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

/// Wire representation of a memory record.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryView {
    pub id: String,
    pub persona_id: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub importance: f32,
    pub content: String,
    pub created_at: String,
    pub access_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl MemoryView {
    fn from_record(record: MemoryRecord, include_context: bool) -> Self {
        Self {
            id: record.id.to_string(),
            persona_id: record.persona_id.to_string(),
            memory_type: record.memory_type.as_str().to_string(),
            importance: record.importance,
            content: record.content,
            created_at: record.created_at.to_rfc3339(),
            access_count: record.access_count,
            conversation_id: record.conversation_id,
            speaker: record.speaker.map(|s| s.as_str().to_string()),
            tags: record.tags,
            context: if include_context { record.context } else { None },
        }
    }
}

/// One recall hit with its scores.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemoryView {
    pub similarity: f32,
    pub final_score: f32,
    pub memory: MemoryView,
}

impl ScoredMemoryView {
    fn from_scored(scored: ScoredMemory, include_context: bool) -> Self {
        Self {
            similarity: scored.similarity,
            final_score: scored.final_score,
            memory: MemoryView::from_record(scored.record, include_context),
        }
    }
}

/// Result of a conversation insert.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub conversation_id: String,
    pub user: MemoryView,
    pub assistant: MemoryView,
}

/// Parse wire memory-type names, rejecting unknown values with a 400.
fn parse_memory_types(raw: &Option<Vec<String>>) -> Result<Vec<MemoryType>, ApiError> {
    raw.as_deref()
        .unwrap_or_default()
        .iter()
        .map(|s| MemoryType::from_str(s).map_err(ApiError::from))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/personas/{id}/memories - add a memory.
#[utoipa::path(
    post,
    path = "/api/personas/{id}/memories",
    params(("id" = String, Path, description = "Persona id")),
    request_body = AddMemoryRequest,
    responses(
        (status = 201, description = "Memory stored", body = MemoryView),
        (status = 400, description = "Validation failure"),
        (status = 404, description = "No such persona"),
        (status = 409, description = "Capacity exhausted"),
    ),
    security(("api_key" = [])),
    tag = "memories"
)]
pub async fn add_memory_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<AddMemoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MemoryView>>), ApiError> {
    auth.require(Permission::Write)?;
    let persona_id = parse_persona_id(&id)?;
    let memory_type = MemoryType::from_str(&request.memory_type)?;

    let manager = state.manager().clone();
    let record = blocking(move || {
        manager
            .add_memory(
                persona_id,
                &request.content,
                MemoryContext {
                    memory_type: Some(memory_type),
                    importance: request.importance,
                    tags: request.tags.unwrap_or_default(),
                    context: request.context,
                    ..Default::default()
                },
            )
            .map_err(ApiError::from)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::success(MemoryView::from_record(record, true)),
    ))
}

/// POST /api/personas/{id}/memories/search - semantic recall.
#[utoipa::path(
    post,
    path = "/api/personas/{id}/memories/search",
    params(("id" = String, Path, description = "Persona id")),
    request_body = SearchMemoriesRequest,
    responses(
        (status = 200, description = "Ranked memories", body = [ScoredMemoryView]),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "memories"
)]
pub async fn search_memories_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<SearchMemoriesRequest>,
) -> Result<Json<ApiResponse<Vec<ScoredMemoryView>>>, ApiError> {
    auth.require(Permission::Read)?;
    let persona_id = parse_persona_id(&id)?;
    let memory_types = parse_memory_types(&request.memory_types)?;

    let manager = state.manager().clone();
    let include_context = request.include_context;
    let results = blocking(move || {
        manager
            .retrieve_relevant_memories(
                persona_id,
                &request.query,
                &RecallOptions {
                    limit: request.limit.unwrap_or(10),
                    threshold: request.threshold,
                    memory_types,
                    max_age: request.max_age.map(Duration::from_millis),
                    ..Default::default()
                },
            )
            .map_err(ApiError::from)
    })
    .await?;

    let count = results.len();
    Ok(ApiResponse::success_with_meta(
        results
            .into_iter()
            .map(|s| ScoredMemoryView::from_scored(s, include_context))
            .collect(),
        serde_json::json!({ "count": count }),
    ))
}

/// POST /api/personas/{id}/conversations - store a turn pair.
#[utoipa::path(
    post,
    path = "/api/personas/{id}/conversations",
    params(("id" = String, Path, description = "Persona id")),
    request_body = ConversationRequest,
    responses(
        (status = 201, description = "Both turns stored", body = ConversationView),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "memories"
)]
pub async fn conversation_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<ConversationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ConversationView>>), ApiError> {
    auth.require(Permission::Write)?;
    let persona_id = parse_persona_id(&id)?;

    let manager = state.manager().clone();
    let exchange = blocking(move || {
        manager
            .add_conversation_exchange(
                persona_id,
                &request.user_message,
                &request.assistant_response,
                request.conversation_id,
            )
            .map_err(ApiError::from)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::success(ConversationView {
            conversation_id: exchange.conversation_id,
            user: MemoryView::from_record(exchange.user, false),
            assistant: MemoryView::from_record(exchange.assistant, false),
        }),
    ))
}

/// GET /api/personas/{id}/conversations/{conversation_id} - history.
#[utoipa::path(
    get,
    path = "/api/personas/{id}/conversations/{conversation_id}",
    params(
        ("id" = String, Path, description = "Persona id"),
        ("conversation_id" = String, Path, description = "Conversation id"),
        ("limit" = Option<usize>, Query, description = "Maximum entries (default 100)"),
    ),
    responses(
        (status = 200, description = "Turns in timestamp order", body = [MemoryView]),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "memories"
)]
pub async fn conversation_history_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, conversation_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<MemoryView>>>, ApiError> {
    auth.require(Permission::Read)?;
    let persona_id = parse_persona_id(&id)?;

    let manager = state.manager().clone();
    let history = blocking(move || {
        manager
            .get_conversation_history(persona_id, &conversation_id, query.limit)
            .map_err(ApiError::from)
    })
    .await?;

    Ok(ApiResponse::success(
        history
            .into_iter()
            .map(|r| MemoryView::from_record(r, false))
            .collect(),
    ))
}

/// POST /api/personas/{id}/cleanup - targeted decay cleanup.
#[utoipa::path(
    post,
    path = "/api/personas/{id}/cleanup",
    params(("id" = String, Path, description = "Persona id")),
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "Removed (or would-remove) memory ids"),
        (status = 404, description = "No such persona"),
    ),
    security(("api_key" = [])),
    tag = "memories"
)]
pub async fn cleanup_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<CleanupRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    auth.require(Permission::Write)?;
    let persona_id = parse_persona_id(&id)?;
    let memory_types = parse_memory_types(&request.memory_types)?;

    let manager = state.manager().clone();
    let dry_run = request.dry_run;
    let removed = blocking(move || {
        manager
            .cleanup_persona(
                persona_id,
                request.older_than.map(Duration::from_millis),
                &memory_types,
                dry_run,
            )
            .map_err(ApiError::from)
    })
    .await?;

    Ok(ApiResponse::success(serde_json::json!({
        "removed": removed.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "count": removed.len(),
        "dryRun": dry_run,
    })))
}
