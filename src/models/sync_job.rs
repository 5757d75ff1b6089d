//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table: one
//! scheduled pass for a (configuration, source, target) triple.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::enums::{JobStatus, SyncType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub configuration_id: Uuid,

    pub chain_id: Uuid,

    pub table_name: String,

    /// `None` means operations from any source
    pub source_location_id: Option<Uuid>,

    pub target_location_id: Uuid,

    pub sync_type: SyncType,

    pub status: JobStatus,

    /// Higher values are claimed first
    pub priority: i32,

    /// Groups the operations issued together with this job
    pub batch_id: String,

    pub scheduled_at: DateTimeWithTimeZone,

    pub retry_count: i32,

    pub max_retries: i32,

    /// Claim lease; an expired lease means the worker died
    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    pub error_message: Option<String>,

    pub operations_processed: i32,
    pub operations_succeeded: i32,
    pub operations_failed: i32,
    pub operations_conflicted: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_configuration::Entity",
        from = "Column::ConfigurationId",
        to = "super::sync_configuration::Column::Id",
        on_delete = "Cascade"
    )]
    SyncConfiguration,
}

impl Related<super::sync_configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncConfiguration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
