//! Immutable per-run rollup keyed by (chain, batch, table).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_performance_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub run_id: Uuid,
    pub chain_id: Uuid,
    pub batch_id: String,
    pub table_name: String,
    pub window_start: DateTimeWithTimeZone,
    pub window_end: DateTimeWithTimeZone,
    pub operations_processed: i32,
    pub operations_succeeded: i32,
    pub operations_failed: i32,
    pub operations_conflicted: i32,
    pub strategy_fallbacks: i32,
    pub total_execution_ms: i64,
    #[sea_orm(column_type = "Double")]
    pub avg_execution_ms: f64,
    #[sea_orm(column_type = "Double")]
    pub throughput_per_second: f64,
    #[sea_orm(column_type = "Double")]
    pub success_rate: f64,
    #[sea_orm(column_type = "Double")]
    pub quality_score: f64,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
