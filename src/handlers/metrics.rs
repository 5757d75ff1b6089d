//! # Sync Metrics Handler

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::auth::{ChainExtension, OperatorAuth};
use crate::error::{ApiError, validation_error};
use crate::handlers::types::{ListResponse, MetricInfo, parse_timestamp};
use crate::repositories::MetricQuery;
use crate::server::AppState;

const MAX_LIMIT: u64 = 1000;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub table_name: Option<String>,
    /// Only windows ending at or after this RFC 3339 timestamp
    pub from: Option<String>,
    /// Only windows ending at or before this RFC 3339 timestamp
    pub to: Option<String>,
    pub limit: Option<u64>,
}

/// Aggregated sync performance, newest window first
#[utoipa::path(
    get,
    path = "/metrics/sync",
    security(("bearer_auth" = [])),
    params(
        ("table_name" = Option<String>, Query, description = "Filter by table"),
        ("from" = Option<String>, Query, description = "RFC 3339 lower bound on window end"),
        ("to" = Option<String>, Query, description = "RFC 3339 upper bound on window end"),
        ("limit" = Option<u64>, Query, description = "Maximum rows (max 1000)"),
        crate::auth::ChainHeader
    ),
    responses(
        (status = 200, description = "Performance metrics", body = ListResponse<MetricInfo>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn list_sync_metrics(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    ChainExtension(chain): ChainExtension,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<ListResponse<MetricInfo>>, ApiError> {
    if params.limit.is_some_and(|limit| limit == 0 || limit > MAX_LIMIT) {
        return Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": "Must be between 1 and 1000" }),
        ));
    }

    let from = parse_timestamp("from", params.from.as_deref())?;
    let to = parse_timestamp("to", params.to.as_deref())?;
    if matches!((from, to), (Some(from), Some(to)) if from > to) {
        return Err(validation_error(
            "Invalid time range",
            serde_json::json!({ "from": "Must not be after 'to'" }),
        ));
    }

    let query = MetricQuery {
        table_name: params.table_name,
        from,
        to,
        limit: params.limit,
    };
    let metrics = state.service.list_metrics(chain.0, &query).await?;
    Ok(Json(ListResponse::new(
        metrics.into_iter().map(MetricInfo::from).collect(),
    )))
}
