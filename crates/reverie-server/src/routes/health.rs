//! Health and stats endpoints.

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use utoipa::ToSchema;

use reverie_memory::{MemoryStats, Permission};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;

/// Health response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - liveness probe, no auth.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthStatus)),
    tag = "system"
)]
pub async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/stats - engine metrics.
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Engine statistics"),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("api_key" = [])),
    tag = "system"
)]
pub async fn stats_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ApiResponse<MemoryStats>>, ApiError> {
    auth.require(Permission::Read)?;
    let manager = state.manager().clone();
    let stats = super::blocking(move || manager.stats().map_err(ApiError::from)).await?;
    Ok(ApiResponse::success(stats))
}
