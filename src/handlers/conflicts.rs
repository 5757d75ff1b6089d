//! # Conflict API Handlers
//!
//! The manual review queue and operator resolution of conflicts.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::auth::{ChainExtension, OperatorAuth};
use crate::error::{ApiError, validation_error};
use crate::handlers::types::{ConflictInfo, ListResponse, parse_uuid};
use crate::resolver::ResolutionStrategy;
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListConflictsQuery {
    /// Maximum number of conflicts to return (default 50, max 200)
    pub limit: Option<u64>,
}

/// Request payload for resolving a conflict
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResolveConflictRequest {
    /// Strategy to record; automatic strategies compute the image when none is given
    pub strategy: ResolutionStrategy,
    /// Image to write to the target; required for `manual`
    #[schema(value_type = Option<Object>)]
    pub resolved_data: Option<JsonValue>,
}

/// Pending conflicts for the chain, highest priority first
#[utoipa::path(
    get,
    path = "/conflicts",
    security(("bearer_auth" = [])),
    params(
        ("limit" = Option<u64>, Query, description = "Maximum number of conflicts to return (default 50, max 200)"),
        crate::auth::ChainHeader
    ),
    responses(
        (status = 200, description = "Pending conflicts", body = ListResponse<ConflictInfo>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "conflicts"
)]
pub async fn list_conflicts(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Query(params): Query<ListConflictsQuery>,
) -> Result<Json<ListResponse<ConflictInfo>>, ApiError> {
    let limit = match params.limit {
        None => DEFAULT_LIMIT,
        Some(0) => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Minimum allowed limit is 1" }),
            ));
        }
        Some(limit) if limit > MAX_LIMIT => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Maximum allowed limit is 200" }),
            ));
        }
        Some(limit) => limit,
    };

    let conflicts = state.service.list_pending_conflicts(chain.0, limit).await?;
    Ok(Json(ListResponse::new(
        conflicts.into_iter().map(ConflictInfo::from).collect(),
    )))
}

/// Resolve a pending conflict
#[utoipa::path(
    post,
    path = "/conflicts/{id}/resolve",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Conflict identifier (UUID)"),
        crate::auth::ChainHeader
    ),
    request_body = ResolveConflictRequest,
    responses(
        (status = 200, description = "Conflict resolved", body = ConflictInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 403, description = "Conflict belongs to another chain", body = ApiError),
        (status = 404, description = "Conflict not found", body = ApiError),
        (status = 409, description = "Conflict already resolved, or its operation is not awaiting review", body = ApiError),
        (status = 502, description = "Target store rejected the resolved image", body = ApiError)
    ),
    tag = "conflicts"
)]
pub async fn resolve_conflict(
    State(state): State<AppState>,
    operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Path(id): Path<String>,
    Json(request): Json<ResolveConflictRequest>,
) -> Result<Json<ConflictInfo>, ApiError> {
    let conflict_id = parse_uuid("id", &id)?;
    let resolved = state
        .service
        .resolve_conflict(
            chain.0,
            conflict_id,
            request.strategy,
            request.resolved_data,
            &operator.name,
        )
        .await?;
    Ok(Json(resolved.into()))
}
