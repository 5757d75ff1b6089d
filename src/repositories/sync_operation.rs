//! # Operation Ledger
//!
//! Append-only record of every propagated change. `claim` is the single
//! point of strict exclusion: a compare-and-set on `status = 'pending'`, so
//! concurrent executors never both hold the same operation. Every later
//! transition is guarded on the expected status (and claiming job) as well.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::enums::{OperationKind, OperationStatus};
use crate::models::sync_operation::{ActiveModel, Column, Entity, Model};

/// A captured change bound for one target location.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub chain_id: Uuid,
    pub source_location_id: Uuid,
    pub target_location_id: Uuid,
    pub table_name: String,
    pub operation_type: OperationKind,
    pub record_id: String,
    pub before_data: Option<JsonValue>,
    pub after_data: Option<JsonValue>,
    pub batch_id: String,
    pub priority: i32,
}

/// Which pending operations a claim may take.
#[derive(Debug, Clone)]
pub struct ClaimFilter {
    pub chain_id: Uuid,
    pub table_name: String,
    pub target_location_id: Uuid,
    /// `None` claims from any source
    pub source_location_id: Option<Uuid>,
    /// Restrict to one batch (delta jobs)
    pub batch_id: Option<String>,
}

/// Backlog summary for one (table, target) stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStats {
    pub count: i64,
    pub max_priority: i32,
}

/// Final outcome written for a processed operation.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub conflict_detected: bool,
    pub resolution_strategy: Option<String>,
    pub resolved_data: Option<JsonValue>,
    pub execution_time_ms: i64,
}

pub struct OperationLedger<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> OperationLedger<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Append pending operations. Duplicates of the dedup key
    /// (source, target, table, record, batch) are skipped; returns rows inserted.
    pub async fn append(&self, operations: Vec<NewOperation>) -> Result<u64, DbErr> {
        let mut inserted = 0;
        for op in operations {
            let now = Utc::now().fixed_offset();
            let model = ActiveModel {
                id: Set(Uuid::now_v7()),
                chain_id: Set(op.chain_id),
                source_location_id: Set(op.source_location_id),
                target_location_id: Set(op.target_location_id),
                table_name: Set(op.table_name),
                operation_type: Set(op.operation_type),
                record_id: Set(op.record_id),
                before_data: Set(op.before_data),
                after_data: Set(op.after_data),
                batch_id: Set(op.batch_id),
                status: Set(OperationStatus::Pending),
                conflict_detected: Set(false),
                resolution_strategy: Set(None),
                resolved_data: Set(None),
                error_message: Set(None),
                execution_time_ms: Set(None),
                retry_count: Set(0),
                priority: Set(op.priority),
                sync_job_id: Set(None),
                lease_expires_at: Set(None),
                claimed_at: Set(None),
                completed_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };

            inserted += Entity::insert(model)
                .on_conflict(
                    OnConflict::columns([
                        Column::SourceLocationId,
                        Column::TargetLocationId,
                        Column::TableName,
                        Column::RecordId,
                        Column::BatchId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(self.db)
                .await?;
        }
        Ok(inserted)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(self.db).await
    }

    /// Atomically move up to `limit` of the oldest matching pending operations
    /// to `in_progress` under `job_id`. Returns only the rows this call won,
    /// in creation order.
    pub async fn claim(
        &self,
        filter: &ClaimFilter,
        limit: u64,
        job_id: Uuid,
        lease_until: DateTimeWithTimeZone,
    ) -> Result<Vec<Model>, DbErr> {
        let mut candidates = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::ChainId.eq(filter.chain_id))
            .filter(Column::TableName.eq(filter.table_name.as_str()))
            .filter(Column::TargetLocationId.eq(filter.target_location_id))
            .filter(Column::Status.eq(OperationStatus::Pending));
        if let Some(source) = filter.source_location_id {
            candidates = candidates.filter(Column::SourceLocationId.eq(source));
        }
        if let Some(batch_id) = &filter.batch_id {
            candidates = candidates.filter(Column::BatchId.eq(batch_id.as_str()));
        }
        let ids: Vec<Uuid> = candidates
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .into_tuple()
            .all(self.db)
            .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::InProgress))
            .col_expr(Column::SyncJobId, Expr::value(Some(job_id)))
            .col_expr(Column::LeaseExpiresAt, Expr::value(Some(lease_until)))
            .col_expr(Column::ClaimedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.is_in(ids.clone()))
            .filter(Column::Status.eq(OperationStatus::Pending))
            .exec(self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(Vec::new());
        }

        Entity::find()
            .filter(Column::Id.is_in(ids))
            .filter(Column::SyncJobId.eq(job_id))
            .filter(Column::Status.eq(OperationStatus::InProgress))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
    }

    /// Guarded transition of a claimed operation to `completed`.
    pub async fn mark_completed(
        &self,
        op: &Model,
        completion: Completion,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::Completed))
            .col_expr(Column::ConflictDetected, Expr::value(completion.conflict_detected))
            .col_expr(
                Column::ResolutionStrategy,
                Expr::value(completion.resolution_strategy),
            )
            .col_expr(Column::ResolvedData, Expr::value(completion.resolved_data))
            .col_expr(
                Column::ExecutionTimeMs,
                Expr::value(Some(completion.execution_time_ms)),
            )
            .col_expr(Column::ErrorMessage, Expr::value(Option::<String>::None))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(claimed_by(op))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Guarded transition of a claimed operation to `conflict`.
    pub async fn mark_conflict(
        &self,
        op: &Model,
        strategy: &str,
        execution_time_ms: i64,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::Conflict))
            .col_expr(Column::ConflictDetected, Expr::value(true))
            .col_expr(
                Column::ResolutionStrategy,
                Expr::value(Some(strategy.to_string())),
            )
            .col_expr(Column::ExecutionTimeMs, Expr::value(Some(execution_time_ms)))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(claimed_by(op))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Record a failed apply. The operation returns to `pending` while
    /// `retry_count < max_retries`, otherwise it is failed for good.
    pub async fn record_failure(
        &self,
        op: &Model,
        max_retries: i32,
        error: &str,
    ) -> Result<OperationStatus, DbErr> {
        let retry_count = op.retry_count + 1;
        let next = if retry_count < max_retries {
            OperationStatus::Pending
        } else {
            OperationStatus::Failed
        };
        let now = Utc::now().fixed_offset();
        let completed_at = (next == OperationStatus::Failed).then_some(now);

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(next))
            .col_expr(Column::RetryCount, Expr::value(retry_count))
            .col_expr(Column::ErrorMessage, Expr::value(Some(error.to_string())))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::CompletedAt, Expr::value(completed_at))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(claimed_by(op))
            .exec(self.db)
            .await?;
        Ok(next)
    }

    /// Move a conflicted operation to `completed` after resolution.
    pub async fn complete_resolved_conflict(
        &self,
        op_id: Uuid,
        strategy: &str,
        resolved_data: JsonValue,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::Completed))
            .col_expr(
                Column::ResolutionStrategy,
                Expr::value(Some(strategy.to_string())),
            )
            .col_expr(Column::ResolvedData, Expr::value(Some(resolved_data)))
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(op_id))
            .filter(Column::Status.eq(OperationStatus::Conflict))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Return every operation still held by `job_id` to `pending`.
    pub async fn release_job(&self, job_id: Uuid) -> Result<u64, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::Pending))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::SyncJobId.eq(job_id))
            .filter(Column::Status.eq(OperationStatus::InProgress))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Hand one claimed operation back to `pending` without touching its
    /// retry count.
    pub async fn release(&self, op: &Model) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::Pending))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(claimed_by(op))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Return operations whose claim lease lapsed (dead worker) to `pending`.
    pub async fn reap_expired(&self, now: DateTimeWithTimeZone) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(OperationStatus::Pending))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Status.eq(OperationStatus::InProgress))
            .filter(Column::LeaseExpiresAt.lt(now))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Count and highest priority of pending operations for one stream.
    pub async fn pending_stats(
        &self,
        chain_id: Uuid,
        table_name: &str,
        target_location_id: Uuid,
        source_location_id: Option<Uuid>,
    ) -> Result<Option<PendingStats>, DbErr> {
        let mut query = Entity::find()
            .select_only()
            .column_as(Column::Id.count(), "count")
            .column_as(Column::Priority.max(), "max_priority")
            .filter(Column::ChainId.eq(chain_id))
            .filter(Column::TableName.eq(table_name))
            .filter(Column::TargetLocationId.eq(target_location_id))
            .filter(Column::Status.eq(OperationStatus::Pending));
        if let Some(source) = source_location_id {
            query = query.filter(Column::SourceLocationId.eq(source));
        }
        let row: Option<(i64, Option<i32>)> = query.into_tuple().one(self.db).await?;

        Ok(match row {
            Some((count, Some(max_priority))) if count > 0 => Some(PendingStats {
                count,
                max_priority,
            }),
            _ => None,
        })
    }

    /// Every operation issued under a batch, in creation order.
    pub async fn find_by_batch(&self, chain_id: Uuid, batch_id: &str) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::ChainId.eq(chain_id))
            .filter(Column::BatchId.eq(batch_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
    }

    /// Terminal operations last touched inside `[from, to]`.
    pub async fn terminal_in_window(
        &self,
        from: DateTimeWithTimeZone,
        to: DateTimeWithTimeZone,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.is_in([
                OperationStatus::Completed,
                OperationStatus::Failed,
                OperationStatus::Conflict,
            ]))
            .filter(Column::UpdatedAt.gte(from))
            .filter(Column::UpdatedAt.lte(to))
            .order_by_asc(Column::ChainId)
            .order_by_asc(Column::BatchId)
            .all(self.db)
            .await
    }
}

/// Matches `op` only while it is still claimed by the same job.
fn claimed_by(op: &Model) -> Condition {
    let mut cond = Condition::all()
        .add(Column::Id.eq(op.id))
        .add(Column::Status.eq(OperationStatus::InProgress));
    if let Some(job_id) = op.sync_job_id {
        cond = cond.add(Column::SyncJobId.eq(job_id));
    }
    cond
}
