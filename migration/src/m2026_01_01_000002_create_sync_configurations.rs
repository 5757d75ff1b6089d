//! Migration to create per-(chain, table) sync policy and the per-chain batch sequence.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncConfigurations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncConfigurations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncConfigurations::ChainId).uuid().not_null())
                    .col(ColumnDef::new(SyncConfigurations::TableName).text().not_null())
                    .col(
                        ColumnDef::new(SyncConfigurations::SyncDirection)
                            .text()
                            .not_null()
                            .default("bidirectional"),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::ResolutionStrategy)
                            .text()
                            .not_null()
                            .default("last_write_wins"),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::BatchSize)
                            .integer()
                            .not_null()
                            .default(100),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::FrequencyMinutes)
                            .integer()
                            .not_null()
                            .default(15),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::PriorityWeight)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::FieldRules)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::SourceLocationId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::TargetLocationIds)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::LastRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncConfigurations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_configurations_chain_id")
                            .from(SyncConfigurations::Table, SyncConfigurations::ChainId)
                            .to(Chains::Table, Chains::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_sync_configurations_chain_table")
                    .table(SyncConfigurations::Table)
                    .col(SyncConfigurations::ChainId)
                    .col(SyncConfigurations::TableName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncSequences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncSequences::ChainId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncSequences::LastValue)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncSequences::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncSequences::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("uq_sync_configurations_chain_table")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SyncConfigurations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncConfigurations {
    Table,
    Id,
    ChainId,
    TableName,
    SyncDirection,
    ResolutionStrategy,
    BatchSize,
    FrequencyMinutes,
    PriorityWeight,
    FieldRules,
    SourceLocationId,
    TargetLocationIds,
    IsActive,
    LastRunAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncSequences {
    Table,
    ChainId,
    LastValue,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Chains {
    Table,
    Id,
}
