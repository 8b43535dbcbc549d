//! Low-level vector endpoints.
//!
//! These expose the indexed store directly, bypassing personas and
//! embeddings, for callers that bring their own vectors.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use reverie_core::{Deadline, IndexedMeta, SearchFilters, SearchOptions, VectorId};
use reverie_memory::Permission;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;

use super::{blocking, ValidJson};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Indexed metadata on the wire.
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VectorMetaView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Request to insert a raw vector.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddVectorRequest {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<VectorMetaView>,
}

/// Request to replace a stored vector.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateVectorRequest {
    pub values: Vec<f32>,
}

/// Raw similarity search request.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VectorSearchRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Per-query beam-width override.
    #[serde(default)]
    pub ef: Option<usize>,
    #[serde(default)]
    pub filters: Option<VectorMetaView>,
    #[serde(default)]
    pub include_values: bool,
    #[serde(default)]
    pub include_metadata: bool,
    /// Operation deadline in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// One vector hit on the wire.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VectorHitView {
    pub id: String,
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetaView>,
}

/// A stored vector on the wire.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VectorView {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetaView>,
}

fn parse_vector_id(raw: &str) -> Result<VectorId, ApiError> {
    VectorId::parse(raw).map_err(|_| ApiError::Validation(format!("invalid vector id '{}'", raw)))
}

fn meta_view(meta: IndexedMeta) -> VectorMetaView {
    VectorMetaView {
        persona_id: meta.persona_id,
        kind: meta.kind,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/vectors - insert a raw vector.
#[utoipa::path(
    post,
    path = "/api/vectors",
    request_body = AddVectorRequest,
    responses(
        (status = 201, description = "Vector stored"),
        (status = 400, description = "Dimension mismatch or bad id"),
        (status = 409, description = "Buffer full"),
    ),
    security(("api_key" = [])),
    tag = "vectors"
)]
pub async fn add_vector_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<AddVectorRequest>,
) -> Result<(StatusCode, Json<ApiResponse<serde_json::Value>>), ApiError> {
    auth.require(Permission::VectorsWrite)?;

    let id = match &request.id {
        Some(raw) => parse_vector_id(raw)?,
        None => VectorId::new(),
    };

    let manager = state.manager().clone();
    blocking(move || {
        let meta = request.metadata.unwrap_or_default();
        manager
            .store()
            .add_vector(
                id,
                &request.values,
                IndexedMeta {
                    persona_id: meta.persona_id,
                    kind: meta.kind,
                    created_at_ms: chrono::Utc::now().timestamp_millis(),
                },
            )
            .map_err(ApiError::from)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::success(serde_json::json!({ "id": id.to_string() })),
    ))
}

/// POST /api/vectors/search - raw top-k search.
#[utoipa::path(
    post,
    path = "/api/vectors/search",
    request_body = VectorSearchRequest,
    responses(
        (status = 200, description = "Ranked hits", body = [VectorHitView]),
        (status = 400, description = "Dimension mismatch"),
    ),
    security(("api_key" = [])),
    tag = "vectors"
)]
pub async fn search_vectors_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(request): ValidJson<VectorSearchRequest>,
) -> Result<Json<ApiResponse<Vec<VectorHitView>>>, ApiError> {
    auth.require(Permission::VectorsRead)?;

    let manager = state.manager().clone();
    let hits = blocking(move || {
        let filters = request.filters.unwrap_or_default();
        manager
            .store()
            .search(
                &request.vector,
                &SearchOptions {
                    limit: request.limit.unwrap_or(10),
                    threshold: request.threshold,
                    ef: request.ef,
                    filters: SearchFilters {
                        persona_id: filters.persona_id,
                        kinds: filters.kind.into_iter().collect(),
                        max_age_ms: None,
                        now_ms: chrono::Utc::now().timestamp_millis(),
                    },
                    include_values: request.include_values,
                    include_metadata: request.include_metadata,
                    deadline: request
                        .deadline_ms
                        .map(Deadline::in_millis)
                        .unwrap_or_else(Deadline::none),
                },
            )
            .map_err(ApiError::from)
    })
    .await?;

    let count = hits.len();
    Ok(ApiResponse::success_with_meta(
        hits.into_iter()
            .map(|h| VectorHitView {
                id: h.id.to_string(),
                similarity: h.similarity,
                values: h.values,
                metadata: h.metadata.map(meta_view),
            })
            .collect(),
        serde_json::json!({ "count": count }),
    ))
}

/// GET /api/vectors/{id} - fetch a stored vector.
#[utoipa::path(
    get,
    path = "/api/vectors/{id}",
    params(("id" = String, Path, description = "Vector id")),
    responses(
        (status = 200, description = "The vector", body = VectorView),
        (status = 404, description = "No such vector"),
    ),
    security(("api_key" = [])),
    tag = "vectors"
)]
pub async fn get_vector_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<VectorView>>, ApiError> {
    auth.require(Permission::VectorsRead)?;
    let vector_id = parse_vector_id(&id)?;

    let manager = state.manager().clone();
    let (values, meta) = blocking(move || {
        let values = manager.store().get_vector(vector_id)?;
        let meta = manager.store().get_meta(vector_id);
        Ok((values, meta))
    })
    .await?;

    Ok(ApiResponse::success(VectorView {
        id,
        values,
        metadata: meta.map(meta_view),
    }))
}

/// PUT /api/vectors/{id} - replace a stored vector in place.
#[utoipa::path(
    put,
    path = "/api/vectors/{id}",
    params(("id" = String, Path, description = "Vector id")),
    request_body = UpdateVectorRequest,
    responses(
        (status = 200, description = "Vector replaced"),
        (status = 404, description = "No such vector"),
    ),
    security(("api_key" = [])),
    tag = "vectors"
)]
pub async fn update_vector_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    ValidJson(request): ValidJson<UpdateVectorRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    auth.require(Permission::VectorsWrite)?;
    let vector_id = parse_vector_id(&id)?;

    let manager = state.manager().clone();
    blocking(move || {
        manager
            .store()
            .update_vector(vector_id, &request.values)
            .map_err(ApiError::from)
    })
    .await?;

    Ok(ApiResponse::success(serde_json::json!({ "id": id })))
}

/// DELETE /api/vectors/{id} - delete a vector.
#[utoipa::path(
    delete,
    path = "/api/vectors/{id}",
    params(("id" = String, Path, description = "Vector id")),
    responses(
        (status = 200, description = "Vector deleted"),
        (status = 404, description = "No such vector"),
    ),
    security(("api_key" = [])),
    tag = "vectors"
)]
pub async fn delete_vector_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    auth.require(Permission::VectorsWrite)?;
    let vector_id = parse_vector_id(&id)?;

    let manager = state.manager().clone();
    blocking(move || {
        manager
            .store()
            .delete_vector(vector_id)
            .map_err(ApiError::from)
    })
    .await?;

    Ok(ApiResponse::success(serde_json::json!({ "deleted": id })))
}
