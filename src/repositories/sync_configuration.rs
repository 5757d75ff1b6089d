//! # Sync Configuration Store
//!
//! Per-(chain, table) sync policy. Read on every capture and scheduling pass.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::SyncEngineError;
use crate::models::enums::SyncDirection;
use crate::models::sync_configuration::{self, ActiveModel, Column, Entity, FieldRules, Model};

/// Lowercase SQL identifiers, as used by the location stores.
static TABLE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("Invalid table name regex"));

/// Administrator-supplied configuration values.
#[derive(Debug, Clone)]
pub struct ConfigurationInput {
    pub chain_id: Uuid,
    pub table_name: String,
    pub sync_direction: SyncDirection,
    pub resolution_strategy: String,
    pub batch_size: i32,
    pub frequency_minutes: i32,
    pub priority_weight: i32,
    pub field_rules: Option<FieldRules>,
    pub source_location_id: Option<Uuid>,
    pub target_location_ids: Option<Vec<Uuid>>,
    pub is_active: bool,
}

impl ConfigurationInput {
    fn validate(&self) -> Result<(), SyncEngineError> {
        if !TABLE_NAME_REGEX.is_match(&self.table_name) {
            return Err(SyncEngineError::Validation(format!(
                "table_name '{}' must be a lowercase SQL identifier",
                self.table_name
            )));
        }
        if self.batch_size <= 0 {
            return Err(SyncEngineError::Validation("batch_size must be positive".into()));
        }
        if self.frequency_minutes <= 0 {
            return Err(SyncEngineError::Validation(
                "frequency_minutes must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub struct SyncConfigurationRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> SyncConfigurationRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// The active configuration for a (chain, table), if any.
    pub async fn find_active(
        &self,
        chain_id: Uuid,
        table_name: &str,
    ) -> Result<Option<Model>, SyncEngineError> {
        Ok(Entity::find()
            .filter(Column::ChainId.eq(chain_id))
            .filter(Column::TableName.eq(table_name))
            .filter(Column::IsActive.eq(true))
            .one(self.db)
            .await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, SyncEngineError> {
        Ok(Entity::find_by_id(id).one(self.db).await?)
    }

    pub async fn list_for_chain(&self, chain_id: Uuid) -> Result<Vec<Model>, SyncEngineError> {
        Ok(Entity::find()
            .filter(Column::ChainId.eq(chain_id))
            .order_by_asc(Column::TableName)
            .all(self.db)
            .await?)
    }

    pub async fn list_active(&self) -> Result<Vec<Model>, SyncEngineError> {
        Ok(Entity::find()
            .filter(Column::IsActive.eq(true))
            .order_by_asc(Column::ChainId)
            .order_by_asc(Column::TableName)
            .all(self.db)
            .await?)
    }

    /// Insert or replace the configuration for (chain, table). `last_run_at`
    /// and `created_at` survive an update.
    pub async fn upsert(&self, input: ConfigurationInput) -> Result<Model, SyncEngineError> {
        input.validate()?;
        let now = Utc::now().fixed_offset();
        let field_rules = input
            .field_rules
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| SyncEngineError::Validation(format!("invalid field rules: {e}")))?;
        let target_ids: Option<JsonValue> = input
            .target_location_ids
            .as_ref()
            .map(|ids| JsonValue::from(ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()));

        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            chain_id: Set(input.chain_id),
            table_name: Set(input.table_name.clone()),
            sync_direction: Set(input.sync_direction),
            resolution_strategy: Set(input.resolution_strategy.clone()),
            batch_size: Set(input.batch_size),
            frequency_minutes: Set(input.frequency_minutes),
            priority_weight: Set(input.priority_weight),
            field_rules: Set(field_rules),
            source_location_id: Set(input.source_location_id),
            target_location_ids: Set(target_ids),
            is_active: Set(input.is_active),
            last_run_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(model)
            .on_conflict(
                OnConflict::columns([Column::ChainId, Column::TableName])
                    .update_columns([
                        Column::SyncDirection,
                        Column::ResolutionStrategy,
                        Column::BatchSize,
                        Column::FrequencyMinutes,
                        Column::PriorityWeight,
                        Column::FieldRules,
                        Column::SourceLocationId,
                        Column::TargetLocationIds,
                        Column::IsActive,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db)
            .await?;

        let stored = Entity::find()
            .filter(Column::ChainId.eq(input.chain_id))
            .filter(Column::TableName.eq(input.table_name.as_str()))
            .one(self.db)
            .await?
            .ok_or_else(|| {
                SyncEngineError::Database(sea_orm::DbErr::RecordNotFound(
                    "sync_configuration after upsert".into(),
                ))
            })?;

        tracing::info!(
            chain_id = %stored.chain_id,
            table = %stored.table_name,
            direction = %stored.sync_direction,
            strategy = %stored.resolution_strategy,
            "Sync configuration saved"
        );
        Ok(stored)
    }

    /// Stamp the scheduler's last pass over this configuration.
    pub async fn mark_run(
        &self,
        config: &Model,
        at: DateTimeWithTimeZone,
    ) -> Result<(), SyncEngineError> {
        let mut active: sync_configuration::ActiveModel = config.clone().into();
        active.last_run_at = Set(Some(at));
        active.update(self.db).await?;
        Ok(())
    }
}
