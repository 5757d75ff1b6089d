//! SyncOperation entity model
//!
//! The operation ledger: one row per captured change per target location.
//! Rows are never deleted; once terminal they only move `conflict → completed`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::enums::{OperationKind, OperationStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_operations")]
pub struct Model {
    /// Time-ordered (v7) identifier; breaks `created_at` ties in FIFO order
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub chain_id: Uuid,
    pub source_location_id: Uuid,
    pub target_location_id: Uuid,
    pub table_name: String,
    pub operation_type: OperationKind,
    pub record_id: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub before_data: Option<JsonValue>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub after_data: Option<JsonValue>,
    pub batch_id: String,
    pub status: OperationStatus,
    pub conflict_detected: bool,
    pub resolution_strategy: Option<String>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub resolved_data: Option<JsonValue>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub retry_count: i32,
    pub priority: i32,
    /// Job holding (or last holding) the claim
    pub sync_job_id: Option<Uuid>,
    pub lease_expires_at: Option<DateTimeWithTimeZone>,
    pub claimed_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::sync_conflict::Entity")]
    SyncConflict,
}

impl Related<super::sync_conflict::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncConflict.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
