//! # Location Handlers

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{ChainExtension, OperatorAuth};
use crate::error::{ApiError, validation_error};
use crate::handlers::types::{ListResponse, LocationInfo, parse_uuid};
use crate::repositories::NewLocation;
use crate::server::AppState;

fn default_enabled() -> bool {
    true
}

/// Request payload for registering a location
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateLocationRequest {
    #[schema(example = "Downtown")]
    pub name: String,
    pub region_id: Option<String>,
    /// Lower values are more authoritative
    #[serde(default)]
    pub sync_priority: i32,
    #[serde(default = "default_enabled")]
    pub sync_enabled: bool,
}

/// List the chain's locations
#[utoipa::path(
    get,
    path = "/locations",
    security(("bearer_auth" = [])),
    params(crate::auth::ChainHeader),
    responses(
        (status = 200, description = "Locations of the chain", body = ListResponse<LocationInfo>),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "locations"
)]
pub async fn list_locations(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
) -> Result<Json<ListResponse<LocationInfo>>, ApiError> {
    let locations = state.service.list_locations(chain.0).await?;
    Ok(Json(ListResponse::new(
        locations.into_iter().map(LocationInfo::from).collect(),
    )))
}

/// Register a location in the chain
#[utoipa::path(
    post,
    path = "/locations",
    security(("bearer_auth" = [])),
    params(crate::auth::ChainHeader),
    request_body = CreateLocationRequest,
    responses(
        (status = 201, description = "Location created", body = LocationInfo),
        (status = 400, description = "Validation failed or region outside the chain", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "locations"
)]
pub async fn create_location(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Json(request): Json<CreateLocationRequest>,
) -> Result<(StatusCode, Json<LocationInfo>), ApiError> {
    let name = request.name.trim();
    if name.is_empty() || name.len() > 255 {
        return Err(validation_error(
            "Invalid location name",
            serde_json::json!({ "name": "Must be 1 to 255 characters" }),
        ));
    }
    let region_id = request
        .region_id
        .as_deref()
        .map(|raw| parse_uuid("region_id", raw))
        .transpose()?;

    let location = state
        .service
        .create_location(NewLocation {
            chain_id: chain.0,
            region_id,
            name: name.to_string(),
            sync_priority: request.sync_priority,
            sync_enabled: request.sync_enabled,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(location.into())))
}
