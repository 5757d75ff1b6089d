//! # SyncJob Repository
//!
//! Creation and lookup of sync jobs. Claiming lives in the executor.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use uuid::Uuid;

use crate::models::enums::{JobStatus, SyncType};
use crate::models::sync_job::{ActiveModel, Column, Entity, Model};

/// Values for a job about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewSyncJob {
    pub configuration_id: Uuid,
    pub chain_id: Uuid,
    pub table_name: String,
    pub source_location_id: Option<Uuid>,
    pub target_location_id: Uuid,
    pub sync_type: SyncType,
    pub priority: i32,
    pub batch_id: String,
    pub max_retries: i32,
}

/// Repository for sync job database operations
pub struct SyncJobRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> SyncJobRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Enqueue a pending job scheduled for now.
    pub async fn create(&self, job: NewSyncJob) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            configuration_id: Set(job.configuration_id),
            chain_id: Set(job.chain_id),
            table_name: Set(job.table_name),
            source_location_id: Set(job.source_location_id),
            target_location_id: Set(job.target_location_id),
            sync_type: Set(job.sync_type),
            status: Set(JobStatus::Pending),
            priority: Set(job.priority),
            batch_id: Set(job.batch_id),
            scheduled_at: Set(now),
            retry_count: Set(0),
            max_retries: Set(job.max_retries),
            lease_expires_at: Set(None),
            started_at: Set(None),
            finished_at: Set(None),
            error_message: Set(None),
            operations_processed: Set(0),
            operations_succeeded: Set(0),
            operations_failed: Set(0),
            operations_conflicted: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db)
        .await?;

        tracing::debug!(
            job_id = %model.id,
            chain_id = %model.chain_id,
            table = %model.table_name,
            target_location_id = %model.target_location_id,
            priority = model.priority,
            batch_id = %model.batch_id,
            sync_type = %model.sync_type,
            "Sync job enqueued"
        );
        Ok(model)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(self.db).await
    }

    /// True when a pending or running job already covers this target.
    pub async fn has_open_job(
        &self,
        configuration_id: Uuid,
        target_location_id: Uuid,
    ) -> Result<bool, DbErr> {
        let open = Entity::find()
            .filter(Column::ConfigurationId.eq(configuration_id))
            .filter(Column::TargetLocationId.eq(target_location_id))
            .filter(Column::Status.is_in([JobStatus::Pending, JobStatus::InProgress]))
            .one(self.db)
            .await?;
        Ok(open.is_some())
    }

    /// Jobs issued under a batch, scoped to a chain.
    pub async fn find_by_batch(&self, chain_id: Uuid, batch_id: &str) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::ChainId.eq(chain_id))
            .filter(Column::BatchId.eq(batch_id))
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .all(self.db)
            .await
    }
}
