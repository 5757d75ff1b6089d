//! Migration to create the sync_operations ledger.
//!
//! One row per captured change per target location. The unique dedup index
//! makes re-capturing the same change under the same batch a no-op.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncOperations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncOperations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncOperations::ChainId).uuid().not_null())
                    .col(
                        ColumnDef::new(SyncOperations::SourceLocationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::TargetLocationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncOperations::TableName).text().not_null())
                    .col(
                        ColumnDef::new(SyncOperations::OperationType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncOperations::RecordId).text().not_null())
                    .col(
                        ColumnDef::new(SyncOperations::BeforeData)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::AfterData)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncOperations::BatchId).text().not_null())
                    .col(
                        ColumnDef::new(SyncOperations::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::ConflictDetected)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::ResolutionStrategy)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::ResolvedData)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncOperations::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncOperations::ExecutionTimeMs)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncOperations::SyncJobId).uuid().null())
                    .col(
                        ColumnDef::new(SyncOperations::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncOperations::UpdatedAt)
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
                    .name("uq_sync_operations_dedup")
                    .table(SyncOperations::Table)
                    .col(SyncOperations::SourceLocationId)
                    .col(SyncOperations::TargetLocationId)
                    .col(SyncOperations::TableName)
                    .col(SyncOperations::RecordId)
                    .col(SyncOperations::BatchId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Claim path: pending operations for a target/table in FIFO order
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_operations_claim")
                    .table(SyncOperations::Table)
                    .col(SyncOperations::TargetLocationId)
                    .col(SyncOperations::TableName)
                    .col(SyncOperations::Status)
                    .col(SyncOperations::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_operations_batch")
                    .table(SyncOperations::Table)
                    .col(SyncOperations::BatchId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_operations_chain_updated")
                    .table(SyncOperations::Table)
                    .col(SyncOperations::ChainId)
                    .col(SyncOperations::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "uq_sync_operations_dedup",
            "idx_sync_operations_claim",
            "idx_sync_operations_batch",
            "idx_sync_operations_chain_updated",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }
        manager
            .drop_table(Table::drop().table(SyncOperations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncOperations {
    Table,
    Id,
    ChainId,
    SourceLocationId,
    TargetLocationId,
    TableName,
    OperationType,
    RecordId,
    BeforeData,
    AfterData,
    BatchId,
    Status,
    ConflictDetected,
    ResolutionStrategy,
    ResolvedData,
    ErrorMessage,
    ExecutionTimeMs,
    RetryCount,
    Priority,
    SyncJobId,
    LeaseExpiresAt,
    ClaimedAt,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}
