//! Operator-initiated sync passes, batch status and hierarchy rules.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use chain_sync::adapters::AdapterRegistry;
use chain_sync::capture::{ChangeCapture, MutationEvent, MutationObserver};
use chain_sync::error::SyncEngineError;
use chain_sync::executor::SyncExecutor;
use chain_sync::models::enums::{JobStatus, OperationKind, OperationStatus, SyncDirection, SyncType};
use chain_sync::repositories::{HierarchyRepository, NewLocation};
use chain_sync::service::{InitiateSync, SyncService};
use serde_json::json;
use test_utils::{
    ChainFixture, configure_table, create_chain_with_locations, register_stores,
    setup_test_db_arc, test_executor_config,
};
use uuid::Uuid;

fn request(fixture: &ChainFixture, sync_type: SyncType) -> InitiateSync {
    InitiateSync {
        chain_id: fixture.chain_id(),
        table_name: "menu_items".to_string(),
        sync_type,
        source_location_id: None,
        target_location_ids: None,
        batch_id: None,
    }
}

#[tokio::test]
async fn full_sync_snapshots_the_authoritative_location() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 3).await?;
    let locations: Vec<Uuid> = (0..3).map(|i| fixture.location(i)).collect();
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::TopDown,
        "last_write_wins",
    )
    .await?;

    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &locations, "menu_items", &[]);
    stores[0].insert("item-1", json!({"name": "Ramen", "price": 12}));
    stores[0].insert("item-2", json!({"name": "Gyoza", "price": 7}));

    let service = SyncService::new(db.clone(), registry.clone(), 3);
    let initiated = service.initiate_sync(request(&fixture, SyncType::Full)).await?;
    assert_eq!(initiated.operations_enqueued, 4);
    assert_eq!(initiated.jobs.len(), 2);
    assert!(initiated.jobs.iter().all(|job| job.sync_type == SyncType::Full));
    assert!(
        initiated
            .jobs
            .iter()
            .all(|job| job.source_location_id == Some(locations[0]))
    );

    SyncExecutor::new(db.clone(), registry, test_executor_config())
        .claim_and_run_jobs()
        .await?;
    for store in &stores[1..] {
        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot("item-2"), Some(json!({"name": "Gyoza", "price": 7})));
    }

    let status = service
        .batch_status(fixture.chain_id(), &initiated.batch_id)
        .await?;
    assert_eq!(status.jobs.len(), 2);
    assert!(status.jobs.iter().all(|job| job.status == JobStatus::Completed));
    assert_eq!(status.operations.len(), 4);
    assert!(
        status
            .operations
            .iter()
            .all(|op| op.operation_type == OperationKind::Insert
                && op.status == OperationStatus::Completed)
    );
    Ok(())
}

#[tokio::test]
async fn full_sync_honours_requested_targets() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 3).await?;
    let locations: Vec<Uuid> = (0..3).map(|i| fixture.location(i)).collect();
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::TopDown,
        "last_write_wins",
    )
    .await?;
    let registry = Arc::new(AdapterRegistry::new());
    register_stores(
        &registry,
        &locations,
        "menu_items",
        &[("item-1", json!({"name": "Ramen"}))],
    );

    let mut scoped = request(&fixture, SyncType::Full);
    scoped.target_location_ids = Some(vec![locations[2]]);
    let initiated = SyncService::new(db.clone(), registry, 3)
        .initiate_sync(scoped)
        .await?;

    assert_eq!(initiated.operations_enqueued, 1);
    assert_eq!(initiated.jobs.len(), 1);
    assert_eq!(initiated.jobs[0].target_location_id, locations[2]);
    Ok(())
}

#[tokio::test]
async fn delta_sync_pushes_one_captured_batch() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 3).await?;
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::TopDown,
        "last_write_wins",
    )
    .await?;
    let service = SyncService::new(
        db.clone(),
        Arc::new(AdapterRegistry::with_in_memory_fallback()),
        3,
    );

    let missing_batch = service.initiate_sync(request(&fixture, SyncType::Delta)).await;
    assert!(matches!(missing_batch, Err(SyncEngineError::Validation(_))));

    ChangeCapture::new(db.clone(), fixture.location(0))
        .on_mutation(
            MutationEvent::insert("menu_items", "item-1", json!({"name": "Ramen"}))
                .with_batch_id("menu-rollout-3"),
        )
        .await?;

    let mut delta = request(&fixture, SyncType::Delta);
    delta.batch_id = Some("menu-rollout-3".to_string());
    let initiated = service.initiate_sync(delta).await?;
    assert_eq!(initiated.batch_id, "menu-rollout-3");
    assert_eq!(initiated.operations_enqueued, 0);
    assert_eq!(initiated.jobs.len(), 2);
    assert!(
        initiated
            .jobs
            .iter()
            .all(|job| job.batch_id == "menu-rollout-3" && job.sync_type == SyncType::Delta)
    );
    Ok(())
}

#[tokio::test]
async fn incremental_sync_only_targets_locations_with_pending_work() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 3).await?;
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::Bidirectional,
        "last_write_wins",
    )
    .await?;
    let service = SyncService::new(
        db.clone(),
        Arc::new(AdapterRegistry::with_in_memory_fallback()),
        3,
    );

    let idle = service
        .initiate_sync(request(&fixture, SyncType::Incremental))
        .await?;
    assert!(idle.jobs.is_empty());

    ChangeCapture::new(db.clone(), fixture.location(1))
        .on_mutation(MutationEvent::insert("menu_items", "item-1", json!({"name": "Ramen"})))
        .await?;

    let initiated = service
        .initiate_sync(request(&fixture, SyncType::Incremental))
        .await?;
    let mut targets: Vec<Uuid> = initiated
        .jobs
        .iter()
        .map(|job| job.target_location_id)
        .collect();
    targets.sort();
    let mut expected = vec![fixture.location(0), fixture.location(2)];
    expected.sort();
    assert_eq!(targets, expected);
    assert_ne!(initiated.batch_id, idle.batch_id);
    Ok(())
}

#[tokio::test]
async fn initiate_sync_rejects_unknown_tables_and_locations() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let service = SyncService::new(
        db.clone(),
        Arc::new(AdapterRegistry::with_in_memory_fallback()),
        3,
    );

    let unconfigured = service
        .initiate_sync(request(&fixture, SyncType::Incremental))
        .await;
    assert!(matches!(
        unconfigured,
        Err(SyncEngineError::ConfigurationNotFound { .. })
    ));

    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::Bidirectional,
        "last_write_wins",
    )
    .await?;
    let stranger = Uuid::new_v4();
    let mut foreign = request(&fixture, SyncType::Incremental);
    foreign.target_location_ids = Some(vec![stranger]);
    let result = service.initiate_sync(foreign).await;
    assert!(matches!(result, Err(SyncEngineError::LocationNotFound(id)) if id == stranger));

    let unknown_batch = service.batch_status(fixture.chain_id(), "never-issued").await;
    assert!(matches!(unknown_batch, Err(SyncEngineError::BatchNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn locations_cannot_join_another_chains_region() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let hierarchy = HierarchyRepository::new(db.as_ref());
    let noodles = hierarchy.create_chain("Noodle Co").await?;
    let burgers = hierarchy.create_chain("Burger Co").await?;
    let west = hierarchy.create_region(noodles.id, "West").await?;

    let misplaced = hierarchy
        .create_location(NewLocation {
            chain_id: burgers.id,
            region_id: Some(west.id),
            name: "Harbour".to_string(),
            sync_priority: 1,
            sync_enabled: true,
        })
        .await;
    assert!(matches!(misplaced, Err(SyncEngineError::Hierarchy(_))));

    let placed = hierarchy
        .create_location(NewLocation {
            chain_id: noodles.id,
            region_id: Some(west.id),
            name: "Harbour".to_string(),
            sync_priority: 1,
            sync_enabled: true,
        })
        .await?;
    assert_eq!(placed.region_id, Some(west.id));
    Ok(())
}
