//! # Sync API Handlers
//!
//! Operator-triggered sync passes outside the scheduler's cadence.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{ChainExtension, OperatorAuth};
use crate::error::ApiError;
use crate::handlers::types::{JobInfo, parse_uuid};
use crate::models::enums::SyncType;
use crate::server::AppState;
use crate::service::InitiateSync;

/// Request payload for initiating a sync pass
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitiateSyncRequest {
    #[schema(example = "menu_items")]
    pub table_name: String,
    /// One of `full`, `incremental`, `delta`
    pub sync_type: SyncType,
    /// Push only changes captured at this location
    pub source_location_id: Option<String>,
    /// Restrict the pass to these targets
    pub target_location_ids: Option<Vec<String>>,
    /// Batch to push; required for `delta`
    pub batch_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitiateSyncResponse {
    /// Batch identifier the created jobs run under
    #[schema(example = "0192e0a4-6f1c-7b1e-9a0e-3b1f0c2d4e5f:000000000042")]
    pub batch_id: String,
    pub operations_enqueued: u64,
    pub jobs: Vec<JobInfo>,
}

/// Initiate a sync pass for one table
#[utoipa::path(
    post,
    path = "/sync",
    security(("bearer_auth" = [])),
    params(crate::auth::ChainHeader),
    request_body = InitiateSyncRequest,
    responses(
        (status = 202, description = "Sync jobs enqueued", body = InitiateSyncResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "No active configuration for the table", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn initiate_sync(
    State(state): State<AppState>,
    operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Json(request): Json<InitiateSyncRequest>,
) -> Result<(StatusCode, Json<InitiateSyncResponse>), ApiError> {
    let source_location_id = request
        .source_location_id
        .as_deref()
        .map(|raw| parse_uuid("source_location_id", raw))
        .transpose()?;
    let target_location_ids = request
        .target_location_ids
        .map(|ids| {
            ids.iter()
                .map(|raw| parse_uuid("target_location_ids", raw))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let initiated = state
        .service
        .initiate_sync(InitiateSync {
            chain_id: chain.0,
            table_name: request.table_name,
            sync_type: request.sync_type,
            source_location_id,
            target_location_ids,
            batch_id: request.batch_id,
        })
        .await?;

    tracing::info!(
        operator = %operator.name,
        batch_id = %initiated.batch_id,
        jobs = initiated.jobs.len(),
        "Sync initiated"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(InitiateSyncResponse {
            batch_id: initiated.batch_id,
            operations_enqueued: initiated.operations_enqueued,
            jobs: initiated.jobs.into_iter().map(JobInfo::from).collect(),
        }),
    ))
}
