//! Migration to create the sync_conflicts table (one row per conflicted operation).

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncConflicts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncConflicts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::SyncOperationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncConflicts::ChainId).uuid().not_null())
                    .col(ColumnDef::new(SyncConflicts::TableName).text().not_null())
                    .col(ColumnDef::new(SyncConflicts::RecordId).text().not_null())
                    .col(ColumnDef::new(SyncConflicts::ConflictType).text().not_null())
                    .col(
                        ColumnDef::new(SyncConflicts::SourceData)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::TargetData)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncConflicts::BaseData).json_binary().null())
                    .col(
                        ColumnDef::new(SyncConflicts::ConflictingFields)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::ResolutionStrategy)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::StrategyFallback)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::ResolvedData)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncConflicts::ResolvedBy).text().null())
                    .col(
                        ColumnDef::new(SyncConflicts::AutoResolved)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_conflicts_sync_operation_id")
                            .from(SyncConflicts::Table, SyncConflicts::SyncOperationId)
                            .to(SyncOperations::Table, SyncOperations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_sync_conflicts_operation")
                    .table(SyncConflicts::Table)
                    .col(SyncConflicts::SyncOperationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Manual review queue: pending conflicts per chain, highest priority first
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_review_queue ON sync_conflicts (chain_id, status, priority DESC)".to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_conflicts_review_queue")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("uq_sync_conflicts_operation").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncConflicts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncConflicts {
    Table,
    Id,
    SyncOperationId,
    ChainId,
    TableName,
    RecordId,
    ConflictType,
    SourceData,
    TargetData,
    BaseData,
    ConflictingFields,
    ResolutionStrategy,
    StrategyFallback,
    Status,
    ResolvedData,
    ResolvedBy,
    AutoResolved,
    Priority,
    ResolvedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncOperations {
    Table,
    Id,
}
