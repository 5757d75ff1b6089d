//! # Health Aggregator
//!
//! Periodically rolls terminal operations from a trailing window into one
//! immutable [`sync_performance_metric`] row per (chain, batch, table).
//! Rows are never updated; each run carries its own `run_id`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::HealthConfig;
use crate::error::SyncEngineError;
use crate::models::enums::OperationStatus;
use crate::models::{sync_operation, sync_performance_metric};
use crate::repositories::{ConflictRepository, MetricRepository, OperationLedger};

/// Rollup of one (chain, batch, table) group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub chain_id: Uuid,
    pub batch_id: String,
    pub table_name: String,
    pub processed: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub conflicted: i32,
    pub strategy_fallbacks: i32,
    pub total_execution_ms: i64,
    pub avg_execution_ms: f64,
    pub throughput_per_second: f64,
    pub success_rate: f64,
    pub quality_score: f64,
}

/// `0.8 × success rate + 20 × (1 − conflict ratio)`, clamped to 0..=100.
pub fn quality_score(success_rate: f64, conflicted: i32, processed: i32) -> f64 {
    if processed <= 0 {
        return 0.0;
    }
    let conflict_ratio = f64::from(conflicted) / f64::from(processed);
    (0.8 * success_rate + 20.0 * (1.0 - conflict_ratio)).clamp(0.0, 100.0)
}

/// Group terminal operations and compute their rollups.
pub fn summarize(
    operations: &[sync_operation::Model],
    fallback_operation_ids: &HashSet<Uuid>,
    window_seconds: u64,
) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<(Uuid, &str, &str), Vec<&sync_operation::Model>> = BTreeMap::new();
    for op in operations {
        groups
            .entry((op.chain_id, op.batch_id.as_str(), op.table_name.as_str()))
            .or_default()
            .push(op);
    }

    let window = window_seconds.max(1) as f64;
    groups
        .into_iter()
        .map(|((chain_id, batch_id, table_name), ops)| {
            let processed = ops.len() as i32;
            let succeeded = count(&ops, |op| op.status == OperationStatus::Completed);
            let failed = count(&ops, |op| op.status == OperationStatus::Failed);
            let conflicted = count(&ops, |op| op.conflict_detected);
            let strategy_fallbacks = count(&ops, |op| fallback_operation_ids.contains(&op.id));
            let total_execution_ms: i64 =
                ops.iter().filter_map(|op| op.execution_time_ms).sum();
            let success_rate = f64::from(succeeded) / f64::from(processed) * 100.0;

            GroupSummary {
                chain_id,
                batch_id: batch_id.to_string(),
                table_name: table_name.to_string(),
                processed,
                succeeded,
                failed,
                conflicted,
                strategy_fallbacks,
                total_execution_ms,
                avg_execution_ms: total_execution_ms as f64 / f64::from(processed),
                throughput_per_second: f64::from(processed) / window,
                success_rate,
                quality_score: quality_score(success_rate, conflicted, processed),
            }
        })
        .collect()
}

fn count(ops: &[&sync_operation::Model], predicate: impl Fn(&sync_operation::Model) -> bool) -> i32 {
    ops.iter().filter(|op| predicate(**op)).count() as i32
}

pub struct HealthAggregator {
    db: Arc<DatabaseConnection>,
    config: HealthConfig,
}

impl HealthAggregator {
    pub fn new(db: Arc<DatabaseConnection>, config: HealthConfig) -> Self {
        Self { db, config }
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncEngineError> {
        info!(
            interval_seconds = self.config.interval_seconds,
            window_seconds = self.config.window_seconds,
            "Starting health aggregator"
        );
        let interval = TokioDuration::from_secs(self.config.interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Health aggregator shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    if let Err(err) = self.run_once(Utc::now()).await {
                        error!(error = ?err, "Health aggregation failed");
                    }
                }
            }
        }

        info!("Health aggregator stopped");
        Ok(())
    }

    /// Aggregate the window ending at `now`; returns the rows written.
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<sync_performance_metric::Model>, SyncEngineError> {
        let run_id = Uuid::now_v7();
        let window_end = now.fixed_offset();
        let window_start = (now - Duration::seconds(self.config.window_seconds as i64)).fixed_offset();

        let operations = OperationLedger::new(self.db.as_ref())
            .terminal_in_window(window_start, window_end)
            .await?;
        if operations.is_empty() {
            debug!(run_id = %run_id, "No terminal operations in window");
            return Ok(Vec::new());
        }

        let conflicted_ids = operations
            .iter()
            .filter(|op| op.conflict_detected)
            .map(|op| op.id)
            .collect();
        let fallbacks: HashSet<Uuid> = ConflictRepository::new(self.db.as_ref())
            .fallback_operation_ids(conflicted_ids)
            .await?
            .into_iter()
            .collect();

        let summaries = summarize(&operations, &fallbacks, self.config.window_seconds);

        let txn = self.db.begin().await?;
        let metrics_repo = MetricRepository::new(&txn);
        let mut written = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let row = sync_performance_metric::ActiveModel {
                id: Set(Uuid::new_v4()),
                run_id: Set(run_id),
                chain_id: Set(summary.chain_id),
                batch_id: Set(summary.batch_id),
                table_name: Set(summary.table_name),
                window_start: Set(window_start),
                window_end: Set(window_end),
                operations_processed: Set(summary.processed),
                operations_succeeded: Set(summary.succeeded),
                operations_failed: Set(summary.failed),
                operations_conflicted: Set(summary.conflicted),
                strategy_fallbacks: Set(summary.strategy_fallbacks),
                total_execution_ms: Set(summary.total_execution_ms),
                avg_execution_ms: Set(summary.avg_execution_ms),
                throughput_per_second: Set(summary.throughput_per_second),
                success_rate: Set(summary.success_rate),
                quality_score: Set(summary.quality_score),
                created_at: Set(window_end),
            };
            written.push(metrics_repo.insert(row).await?);
        }
        txn.commit().await?;

        if let Some(worst) = written
            .iter()
            .map(|row| row.quality_score)
            .reduce(f64::min)
        {
            gauge!("sync_health_min_quality_score").set(worst);
        }
        info!(run_id = %run_id, groups = written.len(), "Health metrics aggregated");
        Ok(written)
    }
}
