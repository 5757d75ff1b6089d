//! Test utilities for database testing.
//!
//! In-memory SQLite databases with migrations applied, plus fixtures for
//! chains, locations, configurations and in-memory location stores.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chain_sync::adapters::{AdapterRegistry, InMemoryTableAdapter};
use chain_sync::config::{AppConfig, ExecutorConfig};
use chain_sync::models::enums::SyncDirection;
use chain_sync::models::{chain, location, sync_configuration};
use chain_sync::repositories::{
    ConfigurationInput, HierarchyRepository, NewLocation, SyncConfigurationRepository,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    // Fixtures below insert rows directly; keep SQLite from enforcing
    // relations the Postgres schema defers.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// A chain and its locations, most authoritative first.
pub struct ChainFixture {
    pub chain: chain::Model,
    pub locations: Vec<location::Model>,
}

impl ChainFixture {
    pub fn chain_id(&self) -> Uuid {
        self.chain.id
    }

    pub fn location(&self, index: usize) -> Uuid {
        self.locations[index].id
    }
}

/// Creates a chain with `count` enabled locations; location `i` has `sync_priority = i`.
pub async fn create_chain_with_locations(
    db: &DatabaseConnection,
    count: usize,
) -> Result<ChainFixture> {
    let hierarchy = HierarchyRepository::new(db);
    let chain = hierarchy.create_chain("Test Chain").await?;
    let mut locations = Vec::with_capacity(count);
    for i in 0..count {
        locations.push(
            hierarchy
                .create_location(NewLocation {
                    chain_id: chain.id,
                    region_id: None,
                    name: format!("Location {i}"),
                    sync_priority: i as i32,
                    sync_enabled: true,
                })
                .await?,
        );
    }
    Ok(ChainFixture { chain, locations })
}

/// Stores an active configuration that is due every minute.
pub async fn configure_table(
    db: &DatabaseConnection,
    chain_id: Uuid,
    table: &str,
    direction: SyncDirection,
    strategy: &str,
) -> Result<sync_configuration::Model> {
    configure_table_with(db, chain_id, table, direction, strategy, |_| {}).await
}

/// Like [`configure_table`] with a hook to adjust the input first.
pub async fn configure_table_with<F>(
    db: &DatabaseConnection,
    chain_id: Uuid,
    table: &str,
    direction: SyncDirection,
    strategy: &str,
    adjust: F,
) -> Result<sync_configuration::Model>
where
    F: FnOnce(&mut ConfigurationInput),
{
    let mut input = ConfigurationInput {
        chain_id,
        table_name: table.to_string(),
        sync_direction: direction,
        resolution_strategy: strategy.to_string(),
        batch_size: 100,
        frequency_minutes: 1,
        priority_weight: 0,
        field_rules: None,
        source_location_id: None,
        target_location_ids: None,
        is_active: true,
    };
    adjust(&mut input);
    Ok(SyncConfigurationRepository::new(db).upsert(input).await?)
}

/// Executor settings for deterministic tests: one job at a time, short leases.
pub fn test_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        tick_ms: 100,
        concurrency: 1,
        claim_batch: 16,
        max_run_seconds: 30,
        lease_seconds: 60,
    }
}

pub fn test_app_config() -> Arc<AppConfig> {
    Arc::new(AppConfig {
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec!["test-token".to_string()],
        executor: test_executor_config(),
        ..Default::default()
    })
}

/// Registers one in-memory store per location for `table`, seeded with `records`.
pub fn register_stores(
    registry: &AdapterRegistry,
    locations: &[Uuid],
    table: &str,
    records: &[(&str, JsonValue)],
) -> Vec<Arc<InMemoryTableAdapter>> {
    locations
        .iter()
        .map(|location_id| {
            let store = Arc::new(InMemoryTableAdapter::with_records(
                records
                    .iter()
                    .map(|(id, image)| (id.to_string(), image.clone())),
            ));
            registry.register(*location_id, table, store.clone());
            store
        })
        .collect()
}
