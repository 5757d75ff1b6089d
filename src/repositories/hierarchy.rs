//! # Chain Hierarchy Repository
//!
//! Chains, regions and locations. Enforces that a location's region belongs
//! to the location's own chain.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::SyncEngineError;
use crate::models::{chain, location, region};

/// Input for creating a location.
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub chain_id: Uuid,
    pub region_id: Option<Uuid>,
    pub name: String,
    pub sync_priority: i32,
    pub sync_enabled: bool,
}

/// Repository for the chain → region → location hierarchy
pub struct HierarchyRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> HierarchyRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn create_chain(&self, name: &str) -> Result<chain::Model, SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let model = chain::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db)
        .await?;
        tracing::info!(chain_id = %model.id, "Chain created");
        Ok(model)
    }

    pub async fn find_chain(&self, chain_id: Uuid) -> Result<Option<chain::Model>, SyncEngineError> {
        Ok(chain::Entity::find_by_id(chain_id).one(self.db).await?)
    }

    pub async fn create_region(
        &self,
        chain_id: Uuid,
        name: &str,
    ) -> Result<region::Model, SyncEngineError> {
        if self.find_chain(chain_id).await?.is_none() {
            return Err(SyncEngineError::Hierarchy(format!(
                "chain {chain_id} does not exist"
            )));
        }
        let model = region::ActiveModel {
            id: Set(Uuid::new_v4()),
            chain_id: Set(chain_id),
            name: Set(name.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(self.db)
        .await?;
        Ok(model)
    }

    /// Creates a location; a region from another chain is rejected.
    pub async fn create_location(
        &self,
        input: NewLocation,
    ) -> Result<location::Model, SyncEngineError> {
        if input.name.trim().is_empty() {
            return Err(SyncEngineError::Validation(
                "location name must not be empty".into(),
            ));
        }
        if self.find_chain(input.chain_id).await?.is_none() {
            return Err(SyncEngineError::Hierarchy(format!(
                "chain {} does not exist",
                input.chain_id
            )));
        }
        if let Some(region_id) = input.region_id {
            let region = region::Entity::find_by_id(region_id)
                .one(self.db)
                .await?
                .ok_or_else(|| {
                    SyncEngineError::Hierarchy(format!("region {region_id} does not exist"))
                })?;
            if region.chain_id != input.chain_id {
                return Err(SyncEngineError::Hierarchy(format!(
                    "region {region_id} belongs to chain {}, not {}",
                    region.chain_id, input.chain_id
                )));
            }
        }

        let now = Utc::now().fixed_offset();
        let model = location::ActiveModel {
            id: Set(Uuid::new_v4()),
            chain_id: Set(input.chain_id),
            region_id: Set(input.region_id),
            name: Set(input.name),
            sync_priority: Set(input.sync_priority),
            sync_enabled: Set(input.sync_enabled),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db)
        .await?;

        tracing::info!(
            chain_id = %model.chain_id,
            location_id = %model.id,
            sync_priority = model.sync_priority,
            "Location created"
        );
        Ok(model)
    }

    pub async fn find_location(
        &self,
        location_id: Uuid,
    ) -> Result<Option<location::Model>, SyncEngineError> {
        Ok(location::Entity::find_by_id(location_id).one(self.db).await?)
    }

    /// All locations of a chain, most authoritative first.
    pub async fn list_locations(
        &self,
        chain_id: Uuid,
    ) -> Result<Vec<location::Model>, SyncEngineError> {
        Ok(location::Entity::find()
            .filter(location::Column::ChainId.eq(chain_id))
            .order_by_asc(location::Column::SyncPriority)
            .order_by_asc(location::Column::CreatedAt)
            .order_by_asc(location::Column::Id)
            .all(self.db)
            .await?)
    }

    /// Sync-enabled locations of a chain, most authoritative first.
    pub async fn enabled_locations(
        &self,
        chain_id: Uuid,
    ) -> Result<Vec<location::Model>, SyncEngineError> {
        Ok(location::Entity::find()
            .filter(location::Column::ChainId.eq(chain_id))
            .filter(location::Column::SyncEnabled.eq(true))
            .order_by_asc(location::Column::SyncPriority)
            .order_by_asc(location::Column::CreatedAt)
            .order_by_asc(location::Column::Id)
            .all(self.db)
            .await?)
    }
}
