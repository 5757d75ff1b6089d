//! Migration to create immutable per-run sync performance rollups.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncPerformanceMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncPerformanceMetrics::RunId).uuid().not_null())
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::ChainId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::BatchId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::TableName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::WindowStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::WindowEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::OperationsProcessed)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::OperationsSucceeded)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::OperationsFailed)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::OperationsConflicted)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::StrategyFallbacks)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::TotalExecutionMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::AvgExecutionMs)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::ThroughputPerSecond)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::SuccessRate)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::QualityScore)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncPerformanceMetrics::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_performance_metrics_chain_table_window")
                    .table(SyncPerformanceMetrics::Table)
                    .col(SyncPerformanceMetrics::ChainId)
                    .col(SyncPerformanceMetrics::TableName)
                    .col(SyncPerformanceMetrics::WindowEnd)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_performance_metrics_chain_table_window")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(SyncPerformanceMetrics::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum SyncPerformanceMetrics {
    Table,
    Id,
    RunId,
    ChainId,
    BatchId,
    TableName,
    WindowStart,
    WindowEnd,
    OperationsProcessed,
    OperationsSucceeded,
    OperationsFailed,
    OperationsConflicted,
    StrategyFallbacks,
    TotalExecutionMs,
    AvgExecutionMs,
    ThroughputPerSecond,
    SuccessRate,
    QualityScore,
    CreatedAt,
}
