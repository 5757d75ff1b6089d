//! SyncConflict entity model
//!
//! A detected divergence between source and target images, one-to-one with
//! the operation that spawned it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::enums::{ConflictStatus, ConflictType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_conflicts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sync_operation_id: Uuid,
    pub chain_id: Uuid,
    pub table_name: String,
    pub record_id: String,
    pub conflict_type: ConflictType,
    #[sea_orm(column_type = "JsonBinary")]
    pub source_data: JsonValue,
    #[sea_orm(column_type = "JsonBinary")]
    pub target_data: JsonValue,
    /// Source before-image, when the capture had one
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub base_data: Option<JsonValue>,
    /// JSON array of field names
    #[sea_orm(column_type = "JsonBinary")]
    pub conflicting_fields: JsonValue,
    pub resolution_strategy: String,
    /// Set when the configured strategy was unknown and last_write_wins was used
    pub strategy_fallback: bool,
    pub status: ConflictStatus,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub resolved_data: Option<JsonValue>,
    pub resolved_by: Option<String>,
    pub auto_resolved: bool,
    /// Orders the manual review queue, highest first
    pub priority: i32,
    pub resolved_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_operation::Entity",
        from = "Column::SyncOperationId",
        to = "super::sync_operation::Column::Id",
        on_delete = "Cascade"
    )]
    SyncOperation,
}

impl Related<super::sync_operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncOperation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn conflicting_field_names(&self) -> Vec<String> {
        serde_json::from_value(self.conflicting_fields.clone()).unwrap_or_default()
    }
}
