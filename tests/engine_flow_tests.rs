//! End-to-end engine flows: capture at a location, one scheduler pass, one
//! executor pass, against in-memory location stores.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chain_sync::adapters::{AdapterRegistry, TableAdapter};
use chain_sync::capture::{CaptureOutcome, ChangeCapture, DropReason, MutationEvent, MutationObserver};
use chain_sync::error::{StoreError, SyncEngineError};
use chain_sync::executor::SyncExecutor;
use chain_sync::models::enums::{
    ConflictStatus, ConflictType, JobStatus, OperationStatus, SyncDirection, SyncType,
};
use chain_sync::models::{SyncConflict, SyncJob, SyncOperation, sync_conflict, sync_operation};
use chain_sync::repositories::{HierarchyRepository, NewLocation, NewSyncJob, SyncJobRepository};
use chain_sync::resolver::ResolutionStrategy;
use chain_sync::scheduler::SyncScheduler;
use chain_sync::service::{InitiateSync, SyncService};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{Value as JsonValue, json};
use test_utils::{
    configure_table, create_chain_with_locations, register_stores, setup_test_db_arc,
    test_app_config, test_executor_config,
};
use uuid::Uuid;

#[tokio::test]
async fn concurrent_edits_merge_and_converge() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "sop_documents",
        SyncDirection::Bidirectional,
        "merge_strategy",
    )
    .await?;

    let base = json!({
        "title": "Opening checklist",
        "description": "Unlock doors",
        "updated_at": "2026-03-01T08:00:00Z"
    });
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[a, b], "sop_documents", &[("doc-1", base.clone())]);

    let a_after = json!({
        "title": "Opening checklist v2",
        "description": "Unlock doors",
        "updated_at": "2026-03-01T09:00:00Z"
    });
    stores[0].insert("doc-1", a_after.clone());
    ChangeCapture::new(db.clone(), a)
        .on_mutation(MutationEvent::update("sop_documents", "doc-1", base.clone(), a_after))
        .await?;

    let b_after = json!({
        "title": "Opening checklist",
        "description": "Unlock doors, start fryers",
        "updated_at": "2026-03-01T09:30:00Z"
    });
    stores[1].insert("doc-1", b_after.clone());
    ChangeCapture::new(db.clone(), b)
        .on_mutation(MutationEvent::update("sop_documents", "doc-1", base, b_after))
        .await?;

    let jobs = SyncScheduler::new(test_app_config(), db.clone())
        .tick(Utc::now())
        .await?;
    assert_eq!(jobs.len(), 2);

    let executed = SyncExecutor::new(db.clone(), registry, test_executor_config())
        .claim_and_run_jobs()
        .await?;
    assert_eq!(executed, 2);

    let expected = json!({
        "title": "Opening checklist v2",
        "description": "Unlock doors, start fryers",
        "updated_at": "2026-03-01T09:30:00Z"
    });
    assert_eq!(stores[0].snapshot("doc-1"), Some(expected.clone()));
    assert_eq!(stores[1].snapshot("doc-1"), Some(expected));

    let conflicts = SyncConflict::find()
        .filter(sync_conflict::Column::ChainId.eq(fixture.chain_id()))
        .all(db.as_ref())
        .await?;
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::VersionConflict);
    assert_eq!(conflict.status, ConflictStatus::Resolved);
    assert!(conflict.auto_resolved);
    assert_eq!(conflict.resolved_by.as_deref(), Some("system"));

    let operations = SyncOperation::find().all(db.as_ref()).await?;
    assert!(
        operations
            .iter()
            .all(|op| op.status == OperationStatus::Completed)
    );
    let jobs = SyncJob::find().all(db.as_ref()).await?;
    assert!(jobs.iter().all(|job| job.status == JobStatus::Completed));
    Ok(())
}

#[tokio::test]
async fn top_down_delete_reaches_every_location() -> Result<()> {
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

    let item = json!({"name": "Ramen", "price": 12, "updated_at": "2026-03-01T08:00:00Z"});
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &locations, "menu_items", &[("item-1", item.clone())]);

    let branch = ChangeCapture::new(db.clone(), locations[1]);
    let ignored = branch
        .on_mutation(MutationEvent::delete("menu_items", "item-1", Some(item.clone())))
        .await?;
    assert_eq!(ignored, CaptureOutcome::Dropped(DropReason::NotAnEmitter));

    let headquarters = ChangeCapture::new(db.clone(), locations[0]);
    let captured = headquarters
        .on_mutation(MutationEvent::delete("menu_items", "item-1", Some(item)))
        .await?;
    let CaptureOutcome::Captured { targets, appended, .. } = captured else {
        panic!("delete at headquarters should be captured");
    };
    assert_eq!(targets.len(), 2);
    assert_eq!(appended, 2);

    let jobs = SyncScheduler::new(test_app_config(), db.clone())
        .tick(Utc::now())
        .await?;
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|job| job.source_location_id == Some(locations[0])));

    SyncExecutor::new(db.clone(), registry, test_executor_config())
        .claim_and_run_jobs()
        .await?;

    // Headquarters' own store is the emitter; the engine never writes back to it.
    assert!(stores[0].snapshot("item-1").is_some());
    assert!(stores[1].snapshot("item-1").is_none());
    assert!(stores[2].snapshot("item-1").is_none());
    Ok(())
}

#[tokio::test]
async fn manual_conflicts_wait_for_an_operator() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "recipes",
        SyncDirection::Bidirectional,
        "manual",
    )
    .await?;

    let base = json!({"name": "Miso soup", "salt_g": 4, "updated_at": "2026-03-01T08:00:00Z"});
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[a, b], "recipes", &[("recipe-1", base.clone())]);
    // B's edit never reached the ledger; only A's did.
    stores[1].insert(
        "recipe-1",
        json!({"name": "Miso soup", "salt_g": 6, "updated_at": "2026-03-01T08:00:00Z"}),
    );

    let a_after = json!({"name": "Miso soup", "salt_g": 3, "updated_at": "2026-03-01T09:00:00Z"});
    stores[0].insert("recipe-1", a_after.clone());
    ChangeCapture::new(db.clone(), a)
        .on_mutation(MutationEvent::update("recipes", "recipe-1", base, a_after))
        .await?;

    SyncScheduler::new(test_app_config(), db.clone())
        .tick(Utc::now())
        .await?;
    SyncExecutor::new(db.clone(), registry.clone(), test_executor_config())
        .claim_and_run_jobs()
        .await?;

    let service = SyncService::new(db.clone(), registry, 3);
    let pending = service.list_pending_conflicts(fixture.chain_id(), 50).await?;
    assert_eq!(pending.len(), 1);
    let conflict = &pending[0];
    assert_eq!(conflict.conflict_type, ConflictType::DataMismatch);
    assert_eq!(conflict.conflicting_field_names(), vec!["salt_g".to_string()]);
    assert_eq!(
        stores[1].snapshot("recipe-1").map(|image| image["salt_g"].clone()),
        Some(json!(6)),
        "target is untouched until an operator decides"
    );

    let job = SyncJob::find()
        .filter(chain_sync::models::sync_job::Column::TargetLocationId.eq(b))
        .one(db.as_ref())
        .await?
        .expect("job for location B");
    assert_eq!(job.status, JobStatus::Conflict);

    let foreign = service
        .resolve_conflict(
            Uuid::new_v4(),
            conflict.id,
            ResolutionStrategy::Manual,
            Some(json!({})),
            "ops@example.com",
        )
        .await;
    assert!(matches!(foreign, Err(SyncEngineError::Forbidden(_))));

    let missing_image = service
        .resolve_conflict(
            fixture.chain_id(),
            conflict.id,
            ResolutionStrategy::Manual,
            None,
            "ops@example.com",
        )
        .await;
    assert!(matches!(missing_image, Err(SyncEngineError::Validation(_))));

    let decided = json!({"name": "Miso soup", "salt_g": 5, "updated_at": "2026-03-01T10:00:00Z"});
    let resolved = service
        .resolve_conflict(
            fixture.chain_id(),
            conflict.id,
            ResolutionStrategy::Manual,
            Some(decided.clone()),
            "ops@example.com",
        )
        .await?;
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("ops@example.com"));
    assert!(!resolved.auto_resolved);
    assert_eq!(stores[1].snapshot("recipe-1"), Some(decided.clone()));

    let operation = SyncOperation::find_by_id(conflict.sync_operation_id)
        .one(db.as_ref())
        .await?
        .expect("operation behind the conflict");
    assert_eq!(operation.status, OperationStatus::Completed);

    let again = service
        .resolve_conflict(
            fixture.chain_id(),
            conflict.id,
            ResolutionStrategy::Manual,
            Some(decided),
            "ops@example.com",
        )
        .await;
    assert!(matches!(again, Err(SyncEngineError::ConflictAlreadyResolved(_))));
    Ok(())
}

#[tokio::test]
async fn failed_writes_are_retried_on_the_next_pass() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "inventory_items",
        SyncDirection::Bidirectional,
        "last_write_wins",
    )
    .await?;

    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[a, b], "inventory_items", &[]);
    stores[1].fail_next_writes(1, StoreError::Unavailable("store offline".to_string()));

    let flour = json!({"sku": "FLOUR-25", "on_hand": 40, "updated_at": "2026-03-01T08:00:00Z"});
    stores[0].insert("sku-1", flour.clone());
    ChangeCapture::new(db.clone(), a)
        .on_mutation(MutationEvent::insert("inventory_items", "sku-1", flour.clone()))
        .await?;

    let scheduler = SyncScheduler::new(test_app_config(), db.clone());
    let executor = SyncExecutor::new(db.clone(), registry, test_executor_config());
    let started = Utc::now();

    assert_eq!(scheduler.tick(started).await?.len(), 1);
    executor.claim_and_run_jobs().await?;
    assert!(stores[1].snapshot("sku-1").is_none());

    let operation = SyncOperation::find().one(db.as_ref()).await?.expect("captured operation");
    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.retry_count, 1);
    assert_eq!(operation.error_message.as_deref(), Some("store unavailable: store offline"));
    let failed_job = SyncJob::find().one(db.as_ref()).await?.expect("first job");
    assert_eq!(failed_job.status, JobStatus::Failed);
    assert_eq!(failed_job.operations_failed, 1);

    // Not due again until the configured frequency has elapsed.
    assert!(scheduler.tick(started).await?.is_empty());
    assert_eq!(scheduler.tick(started + Duration::minutes(2)).await?.len(), 1);
    executor.claim_and_run_jobs().await?;

    assert_eq!(stores[1].snapshot("sku-1"), Some(flour));
    let operation = SyncOperation::find_by_id(operation.id)
        .one(db.as_ref())
        .await?
        .expect("captured operation");
    assert_eq!(operation.status, OperationStatus::Completed);
    assert_eq!(operation.retry_count, 1);
    Ok(())
}

#[tokio::test]
async fn capture_drops_what_cannot_propagate() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::Bidirectional,
        "last_write_wins",
    )
    .await?;
    let disabled = HierarchyRepository::new(db.as_ref())
        .create_location(NewLocation {
            chain_id: fixture.chain_id(),
            region_id: None,
            name: "Closed for renovation".to_string(),
            sync_priority: 9,
            sync_enabled: false,
        })
        .await?;

    let image = json!({"name": "Gyoza", "price": 7});
    let capture = ChangeCapture::new(db.clone(), fixture.location(0));

    let unconfigured = capture
        .on_mutation(MutationEvent::insert("staff_schedules", "s-1", image.clone()))
        .await?;
    assert_eq!(unconfigured, CaptureOutcome::Dropped(DropReason::NoConfiguration));

    let from_disabled = ChangeCapture::new(db.clone(), disabled.id)
        .on_mutation(MutationEvent::insert("menu_items", "item-1", image.clone()))
        .await?;
    assert_eq!(from_disabled, CaptureOutcome::Dropped(DropReason::LocationDisabled));

    let event = MutationEvent::insert("menu_items", "item-1", image).with_batch_id("pos-batch-7");
    let first = capture.on_mutation(event.clone()).await?;
    let replay = capture.on_mutation(event).await?;
    match (first, replay) {
        (
            CaptureOutcome::Captured {
                batch_id,
                targets,
                appended,
            },
            CaptureOutcome::Captured {
                appended: replayed, ..
            },
        ) => {
            assert_eq!(batch_id, "pos-batch-7");
            assert_eq!(targets, vec![fixture.location(1)], "disabled locations are skipped");
            assert_eq!(appended, 1);
            assert_eq!(replayed, 0);
        }
        other => panic!("expected both captures to succeed, got {other:?}"),
    }

    let missing_after = capture
        .on_mutation(MutationEvent {
            after: None,
            ..MutationEvent::insert("menu_items", "item-2", json!({}))
        })
        .await;
    assert!(matches!(missing_after, Err(SyncEngineError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn failed_auto_resolution_stays_out_of_the_review_queue() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::Bidirectional,
        "last_write_wins",
    )
    .await?;

    let at_a = json!({"name": "Katsu curry", "price": 14, "updated_at": "2026-03-01T09:00:00Z"});
    let at_b = json!({"name": "Katsu curry", "price": 12, "updated_at": "2026-03-01T08:00:00Z"});
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[a, b], "menu_items", &[]);
    stores[0].insert("item-1", at_a.clone());
    stores[1].insert("item-1", at_b.clone());
    stores[1].fail_next_writes(1, StoreError::Unavailable("store offline".to_string()));

    ChangeCapture::new(db.clone(), a)
        .on_mutation(MutationEvent::insert("menu_items", "item-1", at_a.clone()))
        .await?;

    let scheduler = SyncScheduler::new(test_app_config(), db.clone());
    let executor = SyncExecutor::new(db.clone(), registry.clone(), test_executor_config());
    let service = SyncService::new(db.clone(), registry, 3);
    let started = Utc::now();

    scheduler.tick(started).await?;
    executor.claim_and_run_jobs().await?;

    assert!(
        service
            .list_pending_conflicts(fixture.chain_id(), 50)
            .await?
            .is_empty(),
        "a retrying operation is not an operator's problem"
    );
    assert!(SyncConflict::find().all(db.as_ref()).await?.is_empty());
    let operation = SyncOperation::find().one(db.as_ref()).await?.expect("captured operation");
    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.retry_count, 1);
    assert_eq!(stores[1].snapshot("item-1"), Some(at_b));

    scheduler.tick(started + Duration::minutes(2)).await?;
    executor.claim_and_run_jobs().await?;

    let conflicts = SyncConflict::find().all(db.as_ref()).await?;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].status, ConflictStatus::Resolved);
    assert!(conflicts[0].auto_resolved);
    assert_eq!(conflicts[0].resolved_by.as_deref(), Some("system"));
    assert_eq!(stores[1].snapshot("item-1"), Some(at_a));
    let operation = SyncOperation::find_by_id(operation.id)
        .one(db.as_ref())
        .await?
        .expect("captured operation");
    assert_eq!(operation.status, OperationStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn resolution_is_refused_once_the_operation_left_review() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "recipes",
        SyncDirection::Bidirectional,
        "manual",
    )
    .await?;

    let at_a = json!({"name": "Tonkotsu broth", "simmer_h": 12});
    let at_b = json!({"name": "Tonkotsu broth", "simmer_h": 10});
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[a, b], "recipes", &[]);
    stores[0].insert("recipe-1", at_a.clone());
    stores[1].insert("recipe-1", at_b.clone());
    ChangeCapture::new(db.clone(), a)
        .on_mutation(MutationEvent::insert("recipes", "recipe-1", at_a))
        .await?;

    SyncScheduler::new(test_app_config(), db.clone())
        .tick(Utc::now())
        .await?;
    SyncExecutor::new(db.clone(), registry.clone(), test_executor_config())
        .claim_and_run_jobs()
        .await?;

    let service = SyncService::new(db.clone(), registry, 3);
    let pending = service.list_pending_conflicts(fixture.chain_id(), 50).await?;
    assert_eq!(pending.len(), 1);
    let conflict = &pending[0];

    // The operation went back to the queue behind the conflict's back.
    let operation = SyncOperation::find_by_id(conflict.sync_operation_id)
        .one(db.as_ref())
        .await?
        .expect("operation behind the conflict");
    let mut requeued: sync_operation::ActiveModel = operation.into();
    requeued.status = Set(OperationStatus::Pending);
    requeued.update(db.as_ref()).await?;

    let refused = service
        .resolve_conflict(
            fixture.chain_id(),
            conflict.id,
            ResolutionStrategy::Manual,
            Some(json!({"name": "Tonkotsu broth", "simmer_h": 11})),
            "ops@example.com",
        )
        .await;
    assert!(matches!(
        refused,
        Err(SyncEngineError::OperationNotAwaitingReview(id)) if id == conflict.sync_operation_id
    ));
    assert_eq!(stores[1].snapshot("recipe-1"), Some(at_b), "nothing was written");
    let unchanged = SyncConflict::find_by_id(conflict.id)
        .one(db.as_ref())
        .await?
        .expect("conflict row");
    assert_eq!(unchanged.status, ConflictStatus::Pending);
    assert!(unchanged.resolved_by.is_none());
    Ok(())
}

#[tokio::test]
async fn later_edits_wait_behind_a_retrying_one() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (hq, branch) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::TopDown,
        "priority_based",
    )
    .await?;

    let v0 = json!({"name": "Shoyu ramen", "price": 11, "updated_at": "2026-03-01T08:00:00Z"});
    let v1 = json!({"name": "Shoyu ramen", "price": 12, "updated_at": "2026-03-01T09:00:00Z"});
    let v2 = json!({"name": "Shoyu ramen", "price": 13, "updated_at": "2026-03-01T10:00:00Z"});
    let registry = Arc::new(AdapterRegistry::new());
    let stores = register_stores(&registry, &[hq, branch], "menu_items", &[("item-1", v0.clone())]);
    stores[1].fail_next_writes(1, StoreError::Unavailable("store offline".to_string()));

    let capture = ChangeCapture::new(db.clone(), hq);
    capture
        .on_mutation(MutationEvent::update("menu_items", "item-1", v0.clone(), v1.clone()))
        .await?;
    capture
        .on_mutation(MutationEvent::update("menu_items", "item-1", v1, v2.clone()))
        .await?;
    stores[0].insert("item-1", v2.clone());

    let scheduler = SyncScheduler::new(test_app_config(), db.clone());
    let executor = SyncExecutor::new(db.clone(), registry, test_executor_config());
    let started = Utc::now();

    scheduler.tick(started).await?;
    executor.claim_and_run_jobs().await?;
    assert_eq!(
        stores[1].snapshot("item-1"),
        Some(v0),
        "the newer edit must not jump the failed one"
    );
    let operations = SyncOperation::find().all(db.as_ref()).await?;
    assert_eq!(operations.len(), 2);
    assert!(operations.iter().all(|op| op.status == OperationStatus::Pending));
    let retries: Vec<i32> = {
        let mut ops = operations.clone();
        ops.sort_by_key(|op| (op.created_at, op.id));
        ops.iter().map(|op| op.retry_count).collect()
    };
    assert_eq!(retries, vec![1, 0], "the deferred edit spends no retry");
    let job = SyncJob::find().one(db.as_ref()).await?.expect("first job");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.operations_processed, 1);

    scheduler.tick(started + Duration::minutes(2)).await?;
    executor.claim_and_run_jobs().await?;
    assert_eq!(stores[1].snapshot("item-1"), Some(v2.clone()));
    assert_eq!(stores[1].snapshot("item-1"), stores[0].snapshot("item-1"));
    assert!(
        SyncOperation::find()
            .all(db.as_ref())
            .await?
            .iter()
            .all(|op| op.status == OperationStatus::Completed)
    );
    Ok(())
}

/// A location store that never answers in time.
struct StalledStore;

#[async_trait]
impl TableAdapter for StalledStore {
    async fn get(&self, _record_id: &str) -> Result<Option<JsonValue>, StoreError> {
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        Ok(None)
    }

    async fn apply_image(
        &self,
        _record_id: &str,
        _image: Option<&JsonValue>,
    ) -> Result<(), StoreError> {
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        Ok(())
    }
}

#[tokio::test]
async fn jobs_that_overrun_are_failed_and_release_their_operations() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::Bidirectional,
        "last_write_wins",
    )
    .await?;

    let registry = Arc::new(AdapterRegistry::new());
    register_stores(&registry, &[a], "menu_items", &[]);
    registry.register(b, "menu_items", Arc::new(StalledStore));

    ChangeCapture::new(db.clone(), a)
        .on_mutation(MutationEvent::insert("menu_items", "item-1", json!({"name": "Onigiri"})))
        .await?;
    SyncScheduler::new(test_app_config(), db.clone())
        .tick(Utc::now())
        .await?;

    let config = chain_sync::config::ExecutorConfig {
        max_run_seconds: 1,
        ..test_executor_config()
    };
    let executed = SyncExecutor::new(db.clone(), registry, config)
        .claim_and_run_jobs()
        .await?;
    assert_eq!(executed, 1);

    let job = SyncJob::find().one(db.as_ref()).await?.expect("timed out job");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());
    assert!(
        job.error_message
            .as_deref()
            .is_some_and(|message| message.starts_with("timed out after 1s"))
    );

    let operation = SyncOperation::find().one(db.as_ref()).await?.expect("captured operation");
    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.retry_count, 0, "a timeout is not the operation's fault");
    assert!(operation.lease_expires_at.is_none());
    Ok(())
}

#[tokio::test]
async fn reapplying_the_same_snapshot_leaves_targets_unchanged() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let locations = [fixture.location(0), fixture.location(1)];
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
    let ramen = json!({"name": "Ramen", "price": 12, "updated_at": "2026-03-01T08:00:00Z"});
    stores[0].insert("item-1", ramen.clone());

    let service = SyncService::new(db.clone(), registry.clone(), 3);
    let executor = SyncExecutor::new(db.clone(), registry, test_executor_config());
    let full_sync = || InitiateSync {
        chain_id: fixture.chain_id(),
        table_name: "menu_items".to_string(),
        sync_type: SyncType::Full,
        source_location_id: None,
        target_location_ids: None,
        batch_id: None,
    };

    service.initiate_sync(full_sync()).await?;
    executor.claim_and_run_jobs().await?;
    let first = stores[1].snapshot("item-1");
    assert_eq!(first, Some(ramen));

    service.initiate_sync(full_sync()).await?;
    executor.claim_and_run_jobs().await?;
    assert_eq!(stores[1].snapshot("item-1"), first);
    assert_eq!(stores[1].len(), 1);

    let operations = SyncOperation::find().all(db.as_ref()).await?;
    assert_eq!(operations.len(), 2);
    assert!(
        operations
            .iter()
            .all(|op| op.status == OperationStatus::Completed && !op.conflict_detected)
    );
    assert!(SyncConflict::find().all(db.as_ref()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn higher_priority_jobs_are_claimed_first() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 3).await?;
    let config = configure_table(
        &db,
        fixture.chain_id(),
        "menu_items",
        SyncDirection::TopDown,
        "last_write_wins",
    )
    .await?;
    let jobs = SyncJobRepository::new(db.as_ref());
    let job_for = |target: Uuid, priority: i32| NewSyncJob {
        configuration_id: config.id,
        chain_id: fixture.chain_id(),
        table_name: "menu_items".to_string(),
        source_location_id: Some(fixture.location(0)),
        target_location_id: target,
        sync_type: SyncType::Incremental,
        priority,
        batch_id: "batch-1".to_string(),
        max_retries: 3,
    };

    // The low priority job is older, so creation order alone would pick it.
    let low = jobs.create(job_for(fixture.location(1), 1200)).await?;
    let high = jobs.create(job_for(fixture.location(2), 2400)).await?;
    let second_for_high_target = jobs.create(job_for(fixture.location(2), 3000)).await?;

    let claimed = SyncExecutor::new(
        db.clone(),
        Arc::new(AdapterRegistry::with_in_memory_fallback()),
        test_executor_config(),
    )
    .claim_jobs()
    .await?;
    let order: Vec<Uuid> = claimed.iter().map(|job| job.id).collect();
    assert_eq!(
        order,
        vec![second_for_high_target.id, low.id],
        "one job per target, highest priority first"
    );
    assert!(claimed.iter().all(|job| job.status == JobStatus::InProgress));

    let waiting = SyncJob::find_by_id(high.id)
        .one(db.as_ref())
        .await?
        .expect("job behind the same target");
    assert_eq!(waiting.status, JobStatus::Pending);
    Ok(())
}
