//! Health aggregation over operations the executor has finished.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use chain_sync::adapters::AdapterRegistry;
use chain_sync::capture::{ChangeCapture, MutationEvent, MutationObserver};
use chain_sync::config::HealthConfig;
use chain_sync::executor::SyncExecutor;
use chain_sync::health::HealthAggregator;
use chain_sync::models::enums::SyncDirection;
use chain_sync::repositories::{MetricQuery, MetricRepository};
use chain_sync::scheduler::SyncScheduler;
use chrono::{Duration, Utc};
use serde_json::json;
use test_utils::{
    configure_table, create_chain_with_locations, register_stores, setup_test_db_arc,
    test_app_config, test_executor_config,
};

#[tokio::test]
async fn empty_window_writes_nothing() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let rows = HealthAggregator::new(db, HealthConfig::default())
        .run_once(Utc::now())
        .await?;
    assert!(rows.is_empty());
    Ok(())
}

#[tokio::test]
async fn finished_batches_are_rolled_up_with_conflicts_and_fallbacks() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    // Unknown strategies fall back to last-write-wins and are counted.
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::Bidirectional,
        "coin_flip",
    )
    .await?;

    let base = json!({"name": "Tempura", "price": 10, "updated_at": "2026-03-01T08:00:00Z"});
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[a, b], "menu_items", &[("item-1", base.clone())]);
    let newer_at_b = json!({"name": "Tempura", "price": 10, "updated_at": "2026-03-01T10:00:00Z"});
    stores[1].insert("item-1", newer_at_b.clone());

    let capture = ChangeCapture::new(db.clone(), a);
    capture
        .on_mutation(
            MutationEvent::update(
                "menu_items",
                "item-1",
                base,
                json!({"name": "Tempura", "price": 11, "updated_at": "2026-03-01T09:00:00Z"}),
            )
            .with_batch_id("pos-batch-1"),
        )
        .await?;
    capture
        .on_mutation(
            MutationEvent::insert("menu_items", "item-2", json!({"name": "Karaage", "price": 9}))
                .with_batch_id("pos-batch-1"),
        )
        .await?;

    SyncScheduler::new(test_app_config(), db.clone())
        .tick(Utc::now())
        .await?;
    SyncExecutor::new(db.clone(), registry, test_executor_config())
        .claim_and_run_jobs()
        .await?;
    assert_eq!(
        stores[1].snapshot("item-1"),
        Some(newer_at_b),
        "the newer target image wins"
    );

    let rows = HealthAggregator::new(db.clone(), HealthConfig::default())
        .run_once(Utc::now() + Duration::seconds(1))
        .await?;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.chain_id, fixture.chain_id());
    assert_eq!(row.batch_id, "pos-batch-1");
    assert_eq!(row.table_name, "menu_items");
    assert_eq!(row.operations_processed, 2);
    assert_eq!(row.operations_succeeded, 2);
    assert_eq!(row.operations_failed, 0);
    assert_eq!(row.operations_conflicted, 1);
    assert_eq!(row.strategy_fallbacks, 1);
    assert!((row.success_rate - 100.0).abs() < f64::EPSILON);
    assert!((row.quality_score - 90.0).abs() < 1e-9);

    let stored = MetricRepository::new(db.as_ref())
        .list(
            fixture.chain_id(),
            &MetricQuery {
                table_name: Some("menu_items".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].run_id, row.run_id);
    Ok(())
}
