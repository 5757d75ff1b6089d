//! Migration to create the sync_jobs table.
//!
//! A sync job is one scheduled pass for a (configuration, source, target)
//! triple. The executor claims jobs by priority and creation time.

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
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::ConfigurationId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::ChainId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::TableName).text().not_null())
                    .col(ColumnDef::new(SyncJobs::SourceLocationId).uuid().null())
                    .col(ColumnDef::new(SyncJobs::TargetLocationId).uuid().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::SyncType)
                            .text()
                            .not_null()
                            .default("incremental"),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::BatchId).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::OperationsProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::OperationsSucceeded)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::OperationsFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::OperationsConflicted)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_jobs_configuration_id")
                            .from(SyncJobs::Table, SyncJobs::ConfigurationId)
                            .to(SyncConfigurations::Table, SyncConfigurations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim order: highest priority first, then FIFO
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_sync_jobs_status_priority_created ON sync_jobs (status, priority DESC, created_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_configuration_target_status")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::ConfigurationId)
                    .col(SyncJobs::TargetLocationId)
                    .col(SyncJobs::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_batch_id")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::BatchId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_status_priority_created")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_configuration_target_status")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_sync_jobs_batch_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    ConfigurationId,
    ChainId,
    TableName,
    SourceLocationId,
    TargetLocationId,
    SyncType,
    Status,
    Priority,
    BatchId,
    ScheduledAt,
    RetryCount,
    MaxRetries,
    LeaseExpiresAt,
    StartedAt,
    FinishedAt,
    ErrorMessage,
    OperationsProcessed,
    OperationsSucceeded,
    OperationsFailed,
    OperationsConflicted,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncConfigurations {
    Table,
    Id,
}
