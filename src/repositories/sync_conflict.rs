//! # Conflict Repository
//!
//! One conflict row per operation. Re-detection on a retried operation
//! refreshes the row instead of adding another.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::enums::{ConflictStatus, ConflictType};
use crate::models::sync_conflict::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone)]
pub struct NewConflict {
    pub sync_operation_id: Uuid,
    pub chain_id: Uuid,
    pub table_name: String,
    pub record_id: String,
    pub conflict_type: ConflictType,
    pub source_data: JsonValue,
    pub target_data: JsonValue,
    pub base_data: Option<JsonValue>,
    pub conflicting_fields: Vec<String>,
    pub resolution_strategy: String,
    pub strategy_fallback: bool,
    pub priority: i32,
}

/// Resolution stamp written to a conflict.
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    pub resolution_strategy: String,
    pub resolved_data: JsonValue,
    pub resolved_by: String,
    pub auto_resolved: bool,
}

pub struct ConflictRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> ConflictRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Record (or refresh) the conflict for an operation; back to pending review.
    pub async fn upsert_for_operation(&self, conflict: NewConflict) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let operation_id = conflict.sync_operation_id;
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            sync_operation_id: Set(conflict.sync_operation_id),
            chain_id: Set(conflict.chain_id),
            table_name: Set(conflict.table_name),
            record_id: Set(conflict.record_id),
            conflict_type: Set(conflict.conflict_type),
            source_data: Set(conflict.source_data),
            target_data: Set(conflict.target_data),
            base_data: Set(conflict.base_data),
            conflicting_fields: Set(JsonValue::from(conflict.conflicting_fields)),
            resolution_strategy: Set(conflict.resolution_strategy),
            strategy_fallback: Set(conflict.strategy_fallback),
            status: Set(ConflictStatus::Pending),
            resolved_data: Set(None),
            resolved_by: Set(None),
            auto_resolved: Set(false),
            priority: Set(conflict.priority),
            resolved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::SyncOperationId)
                    .update_columns([
                        Column::ConflictType,
                        Column::SourceData,
                        Column::TargetData,
                        Column::BaseData,
                        Column::ConflictingFields,
                        Column::ResolutionStrategy,
                        Column::StrategyFallback,
                        Column::Status,
                        Column::ResolvedData,
                        Column::ResolvedBy,
                        Column::AutoResolved,
                        Column::Priority,
                        Column::ResolvedAt,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db)
            .await?;

        self.find_by_operation(operation_id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("sync_conflict for {operation_id}")))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(self.db).await
    }

    pub async fn find_by_operation(&self, operation_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::SyncOperationId.eq(operation_id))
            .one(self.db)
            .await
    }

    /// Manual review queue: highest priority first, then oldest.
    pub async fn list_pending(&self, chain_id: Uuid, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::ChainId.eq(chain_id))
            .filter(Column::Status.eq(ConflictStatus::Pending))
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(self.db)
            .await
    }

    /// Stamp a pending conflict resolved; false when it was already resolved.
    pub async fn mark_resolved(
        &self,
        conflict_id: Uuid,
        resolution: ConflictResolution,
        at: DateTimeWithTimeZone,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(ConflictStatus::Resolved))
            .col_expr(
                Column::ResolutionStrategy,
                Expr::value(resolution.resolution_strategy),
            )
            .col_expr(
                Column::ResolvedData,
                Expr::value(Some(resolution.resolved_data)),
            )
            .col_expr(
                Column::ResolvedBy,
                Expr::value(Some(resolution.resolved_by)),
            )
            .col_expr(Column::AutoResolved, Expr::value(resolution.auto_resolved))
            .col_expr(Column::ResolvedAt, Expr::value(Some(at)))
            .col_expr(Column::UpdatedAt, Expr::value(at))
            .filter(Column::Id.eq(conflict_id))
            .filter(Column::Status.eq(ConflictStatus::Pending))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Operation ids among `operation_ids` whose conflict used the fallback strategy.
    pub async fn fallback_operation_ids(&self, operation_ids: Vec<Uuid>) -> Result<Vec<Uuid>, DbErr> {
        if operation_ids.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .select_only()
            .column(Column::SyncOperationId)
            .filter(Column::SyncOperationId.is_in(operation_ids))
            .filter(Column::StrategyFallback.eq(true))
            .into_tuple()
            .all(self.db)
            .await
    }
}
