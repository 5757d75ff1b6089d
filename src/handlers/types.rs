//! # Common API Types
//!
//! Response shapes shared across handlers. Identifiers are rendered as
//! strings and timestamps as RFC 3339.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::error::{ApiError, validation_error};
use crate::models::{
    location, sync_configuration, sync_conflict, sync_job, sync_operation,
    sync_performance_metric,
};

/// Generic list response wrapper
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Items in the order the endpoint documents
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Parse a path or body identifier, naming the field on failure.
pub fn parse_uuid(field: &str, value: &str) -> Result<uuid::Uuid, ApiError> {
    value.parse().map_err(|_| {
        validation_error(
            "Invalid identifier",
            serde_json::json!({ field: "Must be a valid UUID" }),
        )
    })
}

/// Parse an optional RFC 3339 query timestamp.
pub fn parse_timestamp(
    field: &str,
    value: Option<&str>,
) -> Result<Option<sea_orm::prelude::DateTimeWithTimeZone>, ApiError> {
    value
        .map(|raw| {
            chrono::DateTime::parse_from_rfc3339(raw).map_err(|_| {
                validation_error(
                    "Invalid timestamp",
                    serde_json::json!({ field: "Must be an RFC 3339 timestamp" }),
                )
            })
        })
        .transpose()
}

/// Sync job as seen by operators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "0192e0a4-6f1c-7b1e-9a0e-3b1f0c2d4e5f")]
    pub id: String,
    pub configuration_id: String,
    #[schema(example = "menu_items")]
    pub table_name: String,
    pub source_location_id: Option<String>,
    pub target_location_id: String,
    #[schema(example = "incremental")]
    pub sync_type: String,
    #[schema(example = "pending")]
    pub status: String,
    #[schema(example = 1700)]
    pub priority: i32,
    pub batch_id: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
    pub operations_processed: i32,
    pub operations_succeeded: i32,
    pub operations_failed: i32,
    pub operations_conflicted: i32,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            configuration_id: model.configuration_id.to_string(),
            table_name: model.table_name,
            source_location_id: model.source_location_id.map(|id| id.to_string()),
            target_location_id: model.target_location_id.to_string(),
            sync_type: model.sync_type.to_string(),
            status: model.status.to_string(),
            priority: model.priority,
            batch_id: model.batch_id,
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            scheduled_at: model.scheduled_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
            error_message: model.error_message,
            operations_processed: model.operations_processed,
            operations_succeeded: model.operations_succeeded,
            operations_failed: model.operations_failed,
            operations_conflicted: model.operations_conflicted,
        }
    }
}

/// Ledger entry for one record change towards one target
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OperationInfo {
    pub id: String,
    pub source_location_id: String,
    pub target_location_id: String,
    pub table_name: String,
    #[schema(example = "update")]
    pub operation_type: String,
    pub record_id: String,
    #[schema(example = "completed")]
    pub status: String,
    pub conflict_detected: bool,
    pub resolution_strategy: Option<String>,
    pub retry_count: i32,
    pub priority: i32,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<sync_operation::Model> for OperationInfo {
    fn from(model: sync_operation::Model) -> Self {
        Self {
            id: model.id.to_string(),
            source_location_id: model.source_location_id.to_string(),
            target_location_id: model.target_location_id.to_string(),
            table_name: model.table_name,
            operation_type: model.operation_type.to_string(),
            record_id: model.record_id,
            status: model.status.to_string(),
            conflict_detected: model.conflict_detected,
            resolution_strategy: model.resolution_strategy,
            retry_count: model.retry_count,
            priority: model.priority,
            error_message: model.error_message,
            execution_time_ms: model.execution_time_ms,
            created_at: model.created_at.to_rfc3339(),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Conflict between a source change and a target's current image
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConflictInfo {
    pub id: String,
    pub sync_operation_id: String,
    pub table_name: String,
    pub record_id: String,
    #[schema(example = "data_mismatch")]
    pub conflict_type: String,
    #[schema(value_type = Object)]
    pub source_data: JsonValue,
    #[schema(value_type = Object)]
    pub target_data: JsonValue,
    #[schema(value_type = Vec<String>)]
    pub conflicting_fields: JsonValue,
    #[schema(example = "manual")]
    pub resolution_strategy: String,
    pub strategy_fallback: bool,
    #[schema(example = "pending")]
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub resolved_data: Option<JsonValue>,
    pub resolved_by: Option<String>,
    pub auto_resolved: bool,
    pub priority: i32,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl From<sync_conflict::Model> for ConflictInfo {
    fn from(model: sync_conflict::Model) -> Self {
        Self {
            id: model.id.to_string(),
            sync_operation_id: model.sync_operation_id.to_string(),
            table_name: model.table_name,
            record_id: model.record_id,
            conflict_type: model.conflict_type.to_string(),
            source_data: model.source_data,
            target_data: model.target_data,
            conflicting_fields: model.conflicting_fields,
            resolution_strategy: model.resolution_strategy,
            strategy_fallback: model.strategy_fallback,
            status: model.status.to_string(),
            resolved_data: model.resolved_data,
            resolved_by: model.resolved_by,
            auto_resolved: model.auto_resolved,
            priority: model.priority,
            created_at: model.created_at.to_rfc3339(),
            resolved_at: model.resolved_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Aggregated sync performance for one (batch, table) group
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MetricInfo {
    pub id: String,
    pub run_id: String,
    pub batch_id: String,
    pub table_name: String,
    pub window_start: String,
    pub window_end: String,
    pub operations_processed: i32,
    pub operations_succeeded: i32,
    pub operations_failed: i32,
    pub operations_conflicted: i32,
    pub strategy_fallbacks: i32,
    pub avg_execution_ms: f64,
    pub throughput_per_second: f64,
    #[schema(example = 97.5)]
    pub success_rate: f64,
    #[schema(example = 96.0)]
    pub quality_score: f64,
}

impl From<sync_performance_metric::Model> for MetricInfo {
    fn from(model: sync_performance_metric::Model) -> Self {
        Self {
            id: model.id.to_string(),
            run_id: model.run_id.to_string(),
            batch_id: model.batch_id,
            table_name: model.table_name,
            window_start: model.window_start.to_rfc3339(),
            window_end: model.window_end.to_rfc3339(),
            operations_processed: model.operations_processed,
            operations_succeeded: model.operations_succeeded,
            operations_failed: model.operations_failed,
            operations_conflicted: model.operations_conflicted,
            strategy_fallbacks: model.strategy_fallbacks,
            avg_execution_ms: model.avg_execution_ms,
            throughput_per_second: model.throughput_per_second,
            success_rate: model.success_rate,
            quality_score: model.quality_score,
        }
    }
}

/// Per-table sync policy of a chain
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfigurationInfo {
    pub id: String,
    #[schema(example = "menu_items")]
    pub table_name: String,
    #[schema(example = "top_down")]
    pub sync_direction: String,
    #[schema(example = "merge_strategy")]
    pub resolution_strategy: String,
    pub batch_size: i32,
    pub frequency_minutes: i32,
    pub priority_weight: i32,
    #[schema(value_type = Option<Object>)]
    pub field_rules: Option<JsonValue>,
    pub source_location_id: Option<String>,
    pub target_location_ids: Option<Vec<String>>,
    pub is_active: bool,
    pub last_run_at: Option<String>,
}

impl From<sync_configuration::Model> for ConfigurationInfo {
    fn from(model: sync_configuration::Model) -> Self {
        let target_location_ids = model
            .target_ids()
            .map(|ids| ids.iter().map(ToString::to_string).collect());
        Self {
            id: model.id.to_string(),
            table_name: model.table_name,
            sync_direction: model.sync_direction.to_string(),
            resolution_strategy: model.resolution_strategy,
            batch_size: model.batch_size,
            frequency_minutes: model.frequency_minutes,
            priority_weight: model.priority_weight,
            field_rules: model.field_rules,
            source_location_id: model.source_location_id.map(|id| id.to_string()),
            target_location_ids,
            is_active: model.is_active,
            last_run_at: model.last_run_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Restaurant location participating in sync
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LocationInfo {
    pub id: String,
    pub region_id: Option<String>,
    #[schema(example = "Downtown")]
    pub name: String,
    pub sync_priority: i32,
    pub sync_enabled: bool,
    pub created_at: String,
}

impl From<location::Model> for LocationInfo {
    fn from(model: location::Model) -> Self {
        Self {
            id: model.id.to_string(),
            region_id: model.region_id.map(|id| id.to_string()),
            name: model.name,
            sync_priority: model.sync_priority,
            sync_enabled: model.sync_enabled,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}
