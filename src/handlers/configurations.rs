//! # Sync Configuration Handlers
//!
//! Chain administrators list and upsert per-table sync policy.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{ChainExtension, OperatorAuth};
use crate::error::ApiError;
use crate::handlers::types::{ConfigurationInfo, ListResponse, parse_uuid};
use crate::models::enums::SyncDirection;
use crate::models::sync_configuration::FieldRules;
use crate::repositories::ConfigurationInput;
use crate::server::AppState;

fn default_batch_size() -> i32 {
    100
}

fn default_frequency_minutes() -> i32 {
    15
}

fn default_strategy() -> String {
    "last_write_wins".to_string()
}

fn default_active() -> bool {
    true
}

/// Request payload for creating or replacing a table's configuration
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpsertConfigurationRequest {
    #[schema(example = "menu_items")]
    pub table_name: String,
    pub sync_direction: SyncDirection,
    /// `last_write_wins`, `priority_based`, `merge_strategy` or `manual`
    #[serde(default = "default_strategy")]
    #[schema(example = "merge_strategy")]
    pub resolution_strategy: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,
    #[serde(default = "default_frequency_minutes")]
    pub frequency_minutes: i32,
    /// Overrides the built-in table weight when non-zero
    #[serde(default)]
    pub priority_weight: i32,
    pub field_rules: Option<FieldRules>,
    pub source_location_id: Option<String>,
    pub target_location_ids: Option<Vec<String>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// List the chain's sync configurations
#[utoipa::path(
    get,
    path = "/configurations",
    security(("bearer_auth" = [])),
    params(crate::auth::ChainHeader),
    responses(
        (status = 200, description = "Configurations of the chain", body = ListResponse<ConfigurationInfo>),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "configurations"
)]
pub async fn list_configurations(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
) -> Result<Json<ListResponse<ConfigurationInfo>>, ApiError> {
    let configurations = state.service.list_configurations(chain.0).await?;
    Ok(Json(ListResponse::new(
        configurations
            .into_iter()
            .map(ConfigurationInfo::from)
            .collect(),
    )))
}

/// Create or replace a table's configuration
#[utoipa::path(
    put,
    path = "/configurations",
    security(("bearer_auth" = [])),
    params(crate::auth::ChainHeader),
    request_body = UpsertConfigurationRequest,
    responses(
        (status = 200, description = "Stored configuration", body = ConfigurationInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Source location not found in the chain", body = ApiError)
    ),
    tag = "configurations"
)]
pub async fn upsert_configuration(
    State(state): State<AppState>,
    operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Json(request): Json<UpsertConfigurationRequest>,
) -> Result<Json<ConfigurationInfo>, ApiError> {
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

    let stored = state
        .service
        .upsert_configuration(ConfigurationInput {
            chain_id: chain.0,
            table_name: request.table_name,
            sync_direction: request.sync_direction,
            resolution_strategy: request.resolution_strategy,
            batch_size: request.batch_size,
            frequency_minutes: request.frequency_minutes,
            priority_weight: request.priority_weight,
            field_rules: request.field_rules,
            source_location_id,
            target_location_ids,
            is_active: request.is_active,
        })
        .await?;

    tracing::info!(
        operator = %operator.name,
        table = %stored.table_name,
        direction = %stored.sync_direction,
        "Sync configuration stored"
    );
    Ok(Json(stored.into()))
}
