//! Database migrations for the chain synchronization engine.
//!
//! Tables are created leaf-first: the chain hierarchy, then sync policy,
//! then the job queue, the operation ledger, conflicts and metric rollups.

pub use sea_orm_migration::prelude::*;

mod m2026_01_01_000001_create_chain_hierarchy;
mod m2026_01_01_000002_create_sync_configurations;
mod m2026_01_01_000003_create_sync_jobs;
mod m2026_01_01_000004_create_sync_operations;
mod m2026_01_01_000005_create_sync_conflicts;
mod m2026_01_01_000006_create_sync_performance_metrics;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_01_000001_create_chain_hierarchy::Migration),
            Box::new(m2026_01_01_000002_create_sync_configurations::Migration),
            Box::new(m2026_01_01_000003_create_sync_jobs::Migration),
            Box::new(m2026_01_01_000004_create_sync_operations::Migration),
            Box::new(m2026_01_01_000005_create_sync_conflicts::Migration),
            Box::new(m2026_01_01_000006_create_sync_performance_metrics::Migration),
        ]
    }
}
