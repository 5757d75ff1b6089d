//! # Batch Status Handler

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{ChainExtension, OperatorAuth};
use crate::error::ApiError;
use crate::handlers::types::{JobInfo, OperationInfo};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub jobs: Vec<JobInfo>,
    pub operations: Vec<OperationInfo>,
}

/// Job and operation status for one batch
#[utoipa::path(
    get,
    path = "/batches/{batch_id}",
    security(("bearer_auth" = [])),
    params(
        ("batch_id" = String, Path, description = "Batch identifier returned by POST /sync"),
        crate::auth::ChainHeader
    ),
    responses(
        (status = 200, description = "Batch status", body = BatchStatusResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown batch", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn batch_status(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let status = state.service.batch_status(chain.0, &batch_id).await?;
    Ok(Json(BatchStatusResponse {
        batch_id: status.batch_id,
        jobs: status.jobs.into_iter().map(JobInfo::from).collect(),
        operations: status.operations.into_iter().map(OperationInfo::from).collect(),
    }))
}
