//! Operation ledger: append dedup, atomic claims, retry bookkeeping and lease reaping.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::collections::HashSet;

use anyhow::Result;
use chain_sync::models::enums::{OperationKind, OperationStatus};
use chain_sync::repositories::{ClaimFilter, Completion, NewOperation, OperationLedger};
use chrono::{Duration, Utc};
use serde_json::json;
use test_utils::{create_chain_with_locations, setup_test_db, setup_test_db_arc};
use uuid::Uuid;

fn operation(chain_id: Uuid, source: Uuid, target: Uuid, record: &str, batch: &str) -> NewOperation {
    NewOperation {
        chain_id,
        source_location_id: source,
        target_location_id: target,
        table_name: "menu_items".to_string(),
        operation_type: OperationKind::Update,
        record_id: record.to_string(),
        before_data: Some(json!({"price": 10})),
        after_data: Some(json!({"price": 12})),
        batch_id: batch.to_string(),
        priority: 1500,
    }
}

fn filter(chain_id: Uuid, target: Uuid) -> ClaimFilter {
    ClaimFilter {
        chain_id,
        table_name: "menu_items".to_string(),
        target_location_id: target,
        source_location_id: None,
        batch_id: None,
    }
}

#[tokio::test]
async fn append_skips_duplicates_of_the_same_batch() -> Result<()> {
    let db = setup_test_db().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    let ledger = OperationLedger::new(&db);

    let first = ledger
        .append(vec![operation(fixture.chain_id(), a, b, "r1", "batch-1")])
        .await?;
    let replay = ledger
        .append(vec![operation(fixture.chain_id(), a, b, "r1", "batch-1")])
        .await?;
    let next_batch = ledger
        .append(vec![operation(fixture.chain_id(), a, b, "r1", "batch-2")])
        .await?;

    assert_eq!(first, 1);
    assert_eq!(replay, 0);
    assert_eq!(next_batch, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_never_share_an_operation() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    let chain_id = fixture.chain_id();

    let operations = (0..20)
        .map(|i| operation(chain_id, a, b, &format!("r{i}"), "batch-1"))
        .collect();
    OperationLedger::new(db.as_ref()).append(operations).await?;

    let lease = Utc::now().fixed_offset() + Duration::minutes(5);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let job_id = Uuid::new_v4();
            OperationLedger::new(db.as_ref())
                .claim(&filter(chain_id, b), 8, job_id, lease)
                .await
                .map(|ops| (job_id, ops))
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        let (job_id, claimed) = handle.await??;
        for op in claimed {
            assert_eq!(op.sync_job_id, Some(job_id));
            assert_eq!(op.status, OperationStatus::InProgress);
            assert!(seen.insert(op.id), "operation {} claimed twice", op.id);
            total += 1;
        }
    }
    assert!(total > 0);

    // Losers of a race get nothing; whatever is left is still claimable once.
    let rest = OperationLedger::new(db.as_ref())
        .claim(&filter(chain_id, b), 20, Uuid::new_v4(), lease)
        .await?;
    for op in &rest {
        assert!(seen.insert(op.id), "operation {} claimed twice", op.id);
    }
    assert_eq!(total + rest.len(), 20);
    Ok(())
}

#[tokio::test]
async fn claims_are_fifo_and_scoped_to_the_target() -> Result<()> {
    let db = setup_test_db().await?;
    let fixture = create_chain_with_locations(&db, 3).await?;
    let (a, b, c) = (fixture.location(0), fixture.location(1), fixture.location(2));
    let ledger = OperationLedger::new(&db);

    ledger
        .append(vec![
            operation(fixture.chain_id(), a, b, "first", "batch-1"),
            operation(fixture.chain_id(), a, c, "other-target", "batch-1"),
            operation(fixture.chain_id(), a, b, "second", "batch-1"),
        ])
        .await?;

    let lease = Utc::now().fixed_offset() + Duration::minutes(5);
    let claimed = ledger
        .claim(&filter(fixture.chain_id(), b), 10, Uuid::new_v4(), lease)
        .await?;

    let records: Vec<&str> = claimed.iter().map(|op| op.record_id.as_str()).collect();
    assert_eq!(records, vec!["first", "second"]);
    Ok(())
}

#[tokio::test]
async fn batch_filter_limits_claims_to_one_batch() -> Result<()> {
    let db = setup_test_db().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    let ledger = OperationLedger::new(&db);

    ledger
        .append(vec![
            operation(fixture.chain_id(), a, b, "r1", "batch-1"),
            operation(fixture.chain_id(), a, b, "r2", "batch-2"),
        ])
        .await?;

    let mut scoped = filter(fixture.chain_id(), b);
    scoped.batch_id = Some("batch-2".to_string());
    let lease = Utc::now().fixed_offset() + Duration::minutes(5);
    let claimed = ledger.claim(&scoped, 10, Uuid::new_v4(), lease).await?;

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].record_id, "r2");
    Ok(())
}

#[tokio::test]
async fn failures_retry_until_max_retries_then_fail() -> Result<()> {
    let db = setup_test_db().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    let ledger = OperationLedger::new(&db);
    ledger
        .append(vec![operation(fixture.chain_id(), a, b, "r1", "batch-1")])
        .await?;

    let max_retries = 3;
    let lease = Utc::now().fixed_offset() + Duration::minutes(5);
    let mut statuses = Vec::new();
    for _ in 0..max_retries {
        let claimed = ledger
            .claim(&filter(fixture.chain_id(), b), 1, Uuid::new_v4(), lease)
            .await?;
        assert_eq!(claimed.len(), 1);
        statuses.push(
            ledger
                .record_failure(&claimed[0], max_retries, "store unavailable")
                .await?,
        );
    }

    assert_eq!(
        statuses,
        vec![
            OperationStatus::Pending,
            OperationStatus::Pending,
            OperationStatus::Failed
        ]
    );

    let claimed = ledger
        .claim(&filter(fixture.chain_id(), b), 1, Uuid::new_v4(), lease)
        .await?;
    assert!(claimed.is_empty(), "failed operations are terminal");

    let ops = ledger.find_by_batch(fixture.chain_id(), "batch-1").await?;
    assert_eq!(ops[0].retry_count, 3);
    assert_eq!(ops[0].error_message.as_deref(), Some("store unavailable"));
    assert!(ops[0].completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn completion_requires_the_claim_to_still_be_held() -> Result<()> {
    let db = setup_test_db().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    let ledger = OperationLedger::new(&db);
    ledger
        .append(vec![operation(fixture.chain_id(), a, b, "r1", "batch-1")])
        .await?;

    let job_id = Uuid::new_v4();
    let lease = Utc::now().fixed_offset() + Duration::minutes(5);
    let claimed = ledger
        .claim(&filter(fixture.chain_id(), b), 1, job_id, lease)
        .await?;
    assert_eq!(ledger.release_job(job_id).await?, 1);

    let completed = ledger
        .mark_completed(&claimed[0], Completion::default())
        .await?;
    assert!(!completed, "released operations cannot be completed by the old claim");
    Ok(())
}

#[tokio::test]
async fn expired_leases_are_reaped_back_to_pending() -> Result<()> {
    let db = setup_test_db().await?;
    let fixture = create_chain_with_locations(&db, 2).await?;
    let (a, b) = (fixture.location(0), fixture.location(1));
    let ledger = OperationLedger::new(&db);
    ledger
        .append(vec![operation(fixture.chain_id(), a, b, "r1", "batch-1")])
        .await?;

    let expired_lease = Utc::now().fixed_offset() - Duration::seconds(1);
    ledger
        .claim(&filter(fixture.chain_id(), b), 1, Uuid::new_v4(), expired_lease)
        .await?;

    let reaped = ledger.reap_expired(Utc::now().fixed_offset()).await?;
    assert_eq!(reaped, 1);

    let stats = ledger
        .pending_stats(fixture.chain_id(), "menu_items", b, None)
        .await?
        .expect("operation is pending again");
    assert_eq!(stats.count, 1);
    assert_eq!(stats.max_priority, 1500);
    Ok(())
}
