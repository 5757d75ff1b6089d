//! # Sync Executor
//!
//! Claims pending jobs (highest priority first, one running job per target
//! location), then drains each job's operations through the conflict
//! detector and the target location's table adapter. Operations are
//! claimed with a compare-and-set, so two executors never apply the same
//! operation. Apply failures retry up to the job's `max_retries`; database
//! errors abort the job and release its operations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait,
    TransactionTrait,
};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{AdapterRegistry, TableAdapter};
use crate::config::ExecutorConfig;
use crate::detector::{ConflictDetector, ConflictResult, changed_fields};
use crate::error::SyncEngineError;
use crate::models::enums::{ConflictType, JobStatus, OperationKind, OperationStatus, SyncType};
use crate::models::sync_job::{self, Column as JobColumn, Entity as SyncJobEntity};
use crate::models::{sync_configuration, sync_operation};
use crate::repositories::{
    ClaimFilter, Completion, ConflictRepository, ConflictResolution, NewConflict, OperationLedger,
    SyncConfigurationRepository,
};
use crate::resolver::{ConflictImages, ConflictResolver, ResolutionStrategy, conflict_priority};

/// Resolver identity stamped on automatically resolved conflicts.
pub const SYSTEM_RESOLVER: &str = "system";

/// What happened to one claimed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Applied,
    AutoResolved,
    AwaitingReview,
    /// Returned to `pending` for another attempt.
    Retrying,
    Failed,
    /// Handed back unprocessed because an older change to the same record
    /// did not land in this run.
    Deferred,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub processed: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub retrying: i32,
    pub conflicted: i32,
    pub awaiting_review: i32,
    pub deferred: i32,
}

impl JobReport {
    fn record(&mut self, outcome: OperationOutcome) {
        if outcome == OperationOutcome::Deferred {
            self.deferred += 1;
            return;
        }
        self.processed += 1;
        match outcome {
            OperationOutcome::Applied => self.succeeded += 1,
            OperationOutcome::AutoResolved => {
                self.succeeded += 1;
                self.conflicted += 1;
            }
            OperationOutcome::AwaitingReview => {
                self.conflicted += 1;
                self.awaiting_review += 1;
            }
            OperationOutcome::Retrying => self.retrying += 1,
            OperationOutcome::Failed => self.failed += 1,
            OperationOutcome::Deferred => {}
        }
    }

    /// Final job status for this run.
    pub fn status(&self) -> JobStatus {
        if self.awaiting_review > 0 {
            JobStatus::Conflict
        } else if self.failed > 0 || self.retrying > 0 || self.deferred > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

/// Sync executor responsible for running background sync jobs
#[derive(Clone)]
pub struct SyncExecutor {
    db: Arc<DatabaseConnection>,
    adapters: Arc<AdapterRegistry>,
    config: ExecutorConfig,
}

impl SyncExecutor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        adapters: Arc<AdapterRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            db,
            adapters,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the executor loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncEngineError> {
        info!(config = ?self.config, "Starting sync executor");
        let tick = TokioDuration::from_millis(self.config.tick_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync executor shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    match self.claim_and_run_jobs().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Executed sync jobs"),
                        Err(err) => error!(error = ?err, "Executor tick failed"),
                    }
                }
            }
        }

        info!("Sync executor stopped");
        Ok(())
    }

    /// Reap expired leases, claim due jobs and run them to completion.
    #[instrument(skip(self), fields(batch_size = self.config.claim_batch))]
    pub async fn claim_and_run_jobs(&self) -> Result<usize, SyncEngineError> {
        self.reap_expired_leases().await?;

        let timer = Instant::now();
        let jobs = self.claim_jobs().await?;
        let count = jobs.len();
        if jobs.is_empty() {
            return Ok(0);
        }
        counter!("sync_executor_jobs_claimed_total").increment(count as u64);
        info!(count, "Claimed jobs for execution");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(count);
        for job in jobs {
            let executor = self.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncEngineError::Internal("executor semaphore closed".into()))?;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id;
                if let Err(err) = executor.run_job(job).await {
                    error!(job_id = %job_id, error = ?err, "Error running job");
                }
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = ?err, "Job task panicked");
            }
        }

        info!(
            count,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Completed claimed jobs"
        );
        Ok(count)
    }

    /// Atomically move pending jobs to `in_progress`, at most one per target.
    pub async fn claim_jobs(&self) -> Result<Vec<sync_job::Model>, SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let lease_until = now + Duration::seconds(self.config.lease_seconds as i64);
        let txn = self.db.begin().await?;

        let candidates: Vec<(Uuid, Uuid)> = SyncJobEntity::find()
            .select_only()
            .column(JobColumn::Id)
            .column(JobColumn::TargetLocationId)
            .filter(JobColumn::Status.eq(JobStatus::Pending))
            .filter(JobColumn::ScheduledAt.lte(now))
            .filter(
                JobColumn::TargetLocationId.not_in_subquery(
                    SyncJobEntity::find()
                        .select_only()
                        .column(JobColumn::TargetLocationId)
                        .filter(JobColumn::Status.eq(JobStatus::InProgress))
                        .into_query(),
                ),
            )
            .order_by_desc(JobColumn::Priority)
            .order_by_asc(JobColumn::CreatedAt)
            .limit(self.config.claim_batch.saturating_mul(4))
            .into_tuple()
            .all(&txn)
            .await?;

        let mut targets = Vec::new();
        let mut ids = Vec::new();
        for (id, target) in candidates {
            if ids.len() as u64 >= self.config.claim_batch {
                break;
            }
            if !targets.contains(&target) {
                targets.push(target);
                ids.push(id);
            }
        }
        if ids.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let result = SyncJobEntity::update_many()
            .col_expr(JobColumn::Status, Expr::value(JobStatus::InProgress))
            .col_expr(JobColumn::StartedAt, Expr::value(Some(now)))
            .col_expr(JobColumn::LeaseExpiresAt, Expr::value(Some(lease_until)))
            .col_expr(JobColumn::UpdatedAt, Expr::value(now))
            .filter(JobColumn::Id.is_in(ids.clone()))
            .filter(JobColumn::Status.eq(JobStatus::Pending))
            .exec(&txn)
            .await?;

        let mut claimed = if result.rows_affected > 0 {
            SyncJobEntity::find()
                .filter(JobColumn::Id.is_in(ids))
                .filter(JobColumn::Status.eq(JobStatus::InProgress))
                .filter(JobColumn::StartedAt.eq(now))
                .all(&txn)
                .await?
        } else {
            Vec::new()
        };
        txn.commit().await?;

        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(claimed)
    }

    /// Run one claimed job under the execution timeout and record its outcome.
    #[instrument(skip(self, job), fields(job_id = %job.id, table = %job.table_name, target_location_id = %job.target_location_id))]
    pub async fn run_job(&self, job: sync_job::Model) -> Result<JobReport, SyncEngineError> {
        let started = Instant::now();
        let limit = TokioDuration::from_secs(self.config.max_run_seconds);

        let outcome = tokio::time::timeout(limit, self.execute_job(&job)).await;
        histogram!("sync_executor_job_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(Ok(report)) => {
                let status = self.finish_job(&job, &report, None).await?;
                info!(
                    status = %status,
                    processed = report.processed,
                    succeeded = report.succeeded,
                    conflicted = report.conflicted,
                    failed = report.failed,
                    "Sync job finished"
                );
                Ok(report)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Sync job aborted; releasing its operations");
                OperationLedger::new(self.db.as_ref())
                    .release_job(job.id)
                    .await?;
                self.requeue_or_fail(&job, &err.to_string()).await?;
                Err(err)
            }
            Err(_) => {
                error!(
                    max_run_seconds = self.config.max_run_seconds,
                    "Sync job timed out"
                );
                let released = OperationLedger::new(self.db.as_ref())
                    .release_job(job.id)
                    .await?;
                let report = JobReport::default();
                self.finish_job(&job, &report, Some(format!(
                    "timed out after {}s; {released} operations released",
                    self.config.max_run_seconds
                )))
                .await?;
                Ok(report)
            }
        }
    }

    async fn execute_job(&self, job: &sync_job::Model) -> Result<JobReport, SyncEngineError> {
        let configuration = SyncConfigurationRepository::new(self.db.as_ref())
            .find_by_id(job.configuration_id)
            .await?
            .ok_or_else(|| SyncEngineError::ConfigurationNotFound {
                chain_id: job.chain_id,
                table: job.table_name.clone(),
            })?;
        let adapter = self
            .adapters
            .resolve(job.target_location_id, &job.table_name)?;

        let lease_until =
            Utc::now().fixed_offset() + Duration::seconds(self.config.lease_seconds as i64);
        let filter = ClaimFilter {
            chain_id: job.chain_id,
            table_name: job.table_name.clone(),
            target_location_id: job.target_location_id,
            source_location_id: job.source_location_id,
            batch_id: matches!(job.sync_type, SyncType::Delta | SyncType::Full)
                .then(|| job.batch_id.clone()),
        };
        let operations = OperationLedger::new(self.db.as_ref())
            .claim(
                &filter,
                configuration.batch_size.max(1) as u64,
                job.id,
                lease_until,
            )
            .await?;
        debug!(claimed = operations.len(), "Claimed operations");

        // Changes to one record land in creation order; once one misses this
        // run, its younger siblings wait for the next.
        let mut blocked: HashSet<String> = HashSet::new();
        let mut report = JobReport::default();
        for op in operations {
            let outcome = if blocked.contains(&op.record_id) {
                self.defer(&op).await?
            } else {
                self.process_operation(job, &configuration, adapter.as_ref(), &op)
                    .await?
            };
            if matches!(
                outcome,
                OperationOutcome::Retrying | OperationOutcome::Failed | OperationOutcome::Deferred
            ) {
                blocked.insert(op.record_id.clone());
            }
            report.record(outcome);
        }
        Ok(report)
    }

    /// Apply one claimed operation to the target store.
    async fn process_operation(
        &self,
        job: &sync_job::Model,
        configuration: &sync_configuration::Model,
        adapter: &dyn TableAdapter,
        op: &sync_operation::Model,
    ) -> Result<OperationOutcome, SyncEngineError> {
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as i64;

        if op.operation_type == OperationKind::Delete {
            return match adapter.apply_image(&op.record_id, None).await {
                Ok(()) => self.complete(op, Completion::default(), elapsed_ms()).await,
                Err(err) => self.fail(job, op, &err.to_string()).await,
            };
        }

        let Some(after) = op.after_data.as_ref() else {
            return self.fail(job, op, "operation carries no after-image").await;
        };
        let current = match adapter.get(&op.record_id).await {
            Ok(current) => current,
            Err(err) => return self.fail(job, op, &err.to_string()).await,
        };

        let Some(target) = current else {
            return match adapter.apply_image(&op.record_id, Some(after)).await {
                Ok(()) => self.complete(op, Completion::default(), elapsed_ms()).await,
                Err(err) => self.fail(job, op, &err.to_string()).await,
            };
        };

        let rules = configuration.rules();
        let detector = ConflictDetector::new(rules.timestamp_field());
        let result = detector.detect_change(op.before_data.as_ref(), after, &target);

        if !result.has_conflict {
            let image = match op.operation_type {
                OperationKind::Insert => after.clone(),
                _ => overlay(&target, after, &changed_fields(op.before_data.as_ref(), after)),
            };
            return match adapter.apply_image(&op.record_id, Some(&image)).await {
                Ok(()) => self.complete(op, Completion::default(), elapsed_ms()).await,
                Err(err) => self.fail(job, op, &err.to_string()).await,
            };
        }

        counter!("sync_operations_conflicted_total").increment(1);
        let choice = ResolutionStrategy::parse_or_default(&configuration.resolution_strategy);
        let new_conflict = NewConflict {
            sync_operation_id: op.id,
            chain_id: op.chain_id,
            table_name: op.table_name.clone(),
            record_id: op.record_id.clone(),
            conflict_type: result.conflict_type.unwrap_or(ConflictType::DataMismatch),
            source_data: after.clone(),
            target_data: target.clone(),
            base_data: op.before_data.clone(),
            conflicting_fields: result.conflicting_fields.clone(),
            resolution_strategy: choice.strategy.as_str().to_string(),
            strategy_fallback: choice.fallback,
            priority: conflict_priority(op.priority, &result),
        };

        let images = ConflictImages {
            source: after,
            target: &target,
            base: op.before_data.as_ref(),
            timestamp_field: detector.timestamp_field(),
        };
        let Some(resolved) = ConflictResolver.resolve(choice.strategy, &images) else {
            return self.hold_for_review(op, new_conflict, &result, elapsed_ms()).await;
        };

        // The conflict row is only written once the resolved image lands, so
        // a retrying operation never shows up in the review queue.
        if let Err(err) = adapter.apply_image(&op.record_id, Some(&resolved)).await {
            return self.fail(job, op, &err.to_string()).await;
        }

        let txn = self.db.begin().await?;
        let conflicts = ConflictRepository::new(&txn);
        let conflict = conflicts.upsert_for_operation(new_conflict).await?;
        conflicts
            .mark_resolved(
                conflict.id,
                ConflictResolution {
                    resolution_strategy: choice.strategy.as_str().to_string(),
                    resolved_data: resolved.clone(),
                    resolved_by: SYSTEM_RESOLVER.to_string(),
                    auto_resolved: true,
                },
                Utc::now().fixed_offset(),
            )
            .await?;
        let completed = OperationLedger::new(&txn)
            .mark_completed(
                op,
                Completion {
                    conflict_detected: true,
                    resolution_strategy: Some(choice.strategy.as_str().to_string()),
                    resolved_data: Some(resolved),
                    execution_time_ms: elapsed_ms(),
                },
            )
            .await?;
        txn.commit().await?;

        if !completed {
            warn!(operation_id = %op.id, "Operation claim lost before completion");
            return Ok(OperationOutcome::Retrying);
        }
        debug!(
            operation_id = %op.id,
            conflict_id = %conflict.id,
            strategy = %choice.strategy,
            fields = ?result.conflicting_fields,
            "Conflict resolved automatically"
        );
        Ok(OperationOutcome::AutoResolved)
    }

    async fn hold_for_review(
        &self,
        op: &sync_operation::Model,
        conflict: NewConflict,
        result: &ConflictResult,
        execution_time_ms: i64,
    ) -> Result<OperationOutcome, SyncEngineError> {
        let strategy = conflict.resolution_strategy.clone();
        let txn = self.db.begin().await?;
        let stored = ConflictRepository::new(&txn)
            .upsert_for_operation(conflict)
            .await?;
        OperationLedger::new(&txn)
            .mark_conflict(op, &strategy, execution_time_ms)
            .await?;
        txn.commit().await?;

        info!(
            operation_id = %op.id,
            conflict_id = %stored.id,
            fields = ?result.conflicting_fields,
            "Conflict queued for manual review"
        );
        Ok(OperationOutcome::AwaitingReview)
    }

    async fn complete(
        &self,
        op: &sync_operation::Model,
        mut completion: Completion,
        execution_time_ms: i64,
    ) -> Result<OperationOutcome, SyncEngineError> {
        completion.execution_time_ms = execution_time_ms;
        let completed = OperationLedger::new(self.db.as_ref())
            .mark_completed(op, completion)
            .await?;
        if !completed {
            warn!(operation_id = %op.id, "Operation claim lost before completion");
            return Ok(OperationOutcome::Retrying);
        }
        counter!("sync_operations_applied_total").increment(1);
        Ok(OperationOutcome::Applied)
    }

    async fn defer(
        &self,
        op: &sync_operation::Model,
    ) -> Result<OperationOutcome, SyncEngineError> {
        OperationLedger::new(self.db.as_ref()).release(op).await?;
        debug!(
            operation_id = %op.id,
            record_id = %op.record_id,
            "Deferred behind an earlier change to the same record"
        );
        Ok(OperationOutcome::Deferred)
    }

    async fn fail(
        &self,
        job: &sync_job::Model,
        op: &sync_operation::Model,
        message: &str,
    ) -> Result<OperationOutcome, SyncEngineError> {
        let next = OperationLedger::new(self.db.as_ref())
            .record_failure(op, job.max_retries, message)
            .await?;
        if next == OperationStatus::Failed {
            counter!("sync_operations_failed_total").increment(1);
            error!(
                operation_id = %op.id,
                record_id = %op.record_id,
                attempts = op.retry_count + 1,
                error = message,
                "Operation failed permanently"
            );
            Ok(OperationOutcome::Failed)
        } else {
            warn!(
                operation_id = %op.id,
                record_id = %op.record_id,
                attempt = op.retry_count + 1,
                max_retries = job.max_retries,
                error = message,
                "Operation apply failed; will retry"
            );
            Ok(OperationOutcome::Retrying)
        }
    }

    /// Write the job's final status and counters.
    async fn finish_job(
        &self,
        job: &sync_job::Model,
        report: &JobReport,
        error_message: Option<String>,
    ) -> Result<JobStatus, SyncEngineError> {
        let status = if error_message.is_some() {
            JobStatus::Failed
        } else {
            report.status()
        };
        let now = Utc::now().fixed_offset();
        SyncJobEntity::update_many()
            .col_expr(JobColumn::Status, Expr::value(status))
            .col_expr(JobColumn::FinishedAt, Expr::value(Some(now)))
            .col_expr(
                JobColumn::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(JobColumn::OperationsProcessed, Expr::value(report.processed))
            .col_expr(JobColumn::OperationsSucceeded, Expr::value(report.succeeded))
            .col_expr(
                JobColumn::OperationsFailed,
                Expr::value(report.failed + report.retrying),
            )
            .col_expr(JobColumn::OperationsConflicted, Expr::value(report.conflicted))
            .col_expr(JobColumn::ErrorMessage, Expr::value(error_message))
            .col_expr(JobColumn::UpdatedAt, Expr::value(now))
            .filter(JobColumn::Id.eq(job.id))
            .filter(JobColumn::Status.eq(JobStatus::InProgress))
            .exec(self.db.as_ref())
            .await?;
        Ok(status)
    }

    /// Return an aborted job to `pending`, or fail it once its retries are spent.
    async fn requeue_or_fail(
        &self,
        job: &sync_job::Model,
        message: &str,
    ) -> Result<JobStatus, SyncEngineError> {
        let retry_count = job.retry_count + 1;
        let next = if retry_count < job.max_retries {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };
        let now = Utc::now().fixed_offset();
        SyncJobEntity::update_many()
            .col_expr(JobColumn::Status, Expr::value(next))
            .col_expr(JobColumn::RetryCount, Expr::value(retry_count))
            .col_expr(
                JobColumn::LeaseExpiresAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(
                JobColumn::FinishedAt,
                Expr::value((next == JobStatus::Failed).then_some(now)),
            )
            .col_expr(JobColumn::ErrorMessage, Expr::value(Some(message.to_string())))
            .col_expr(JobColumn::UpdatedAt, Expr::value(now))
            .filter(JobColumn::Id.eq(job.id))
            .filter(JobColumn::Status.eq(JobStatus::InProgress))
            .exec(self.db.as_ref())
            .await?;
        Ok(next)
    }

    /// Release work held by executors that died mid-job.
    pub async fn reap_expired_leases(&self) -> Result<(u64, u64), SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let ledger = OperationLedger::new(self.db.as_ref());
        let operations = ledger.reap_expired(now).await?;

        let expired = SyncJobEntity::find()
            .filter(JobColumn::Status.eq(JobStatus::InProgress))
            .filter(JobColumn::LeaseExpiresAt.lt(now))
            .all(self.db.as_ref())
            .await?;
        let jobs = expired.len() as u64;
        for job in expired {
            ledger.release_job(job.id).await?;
            self.requeue_or_fail(&job, "lease expired").await?;
        }

        if operations > 0 || jobs > 0 {
            counter!("sync_executor_leases_reaped_total").increment(operations + jobs);
            warn!(operations, jobs, "Reaped expired leases");
        }
        Ok((operations, jobs))
    }
}

/// Target image with `fields` taken from `after`.
fn overlay(target: &JsonValue, after: &JsonValue, fields: &[String]) -> JsonValue {
    let (Some(target_map), Some(after_map)) = (target.as_object(), after.as_object()) else {
        return after.clone();
    };
    let mut merged = target_map.clone();
    for field in fields {
        if let Some(value) = after_map.get(field) {
            merged.insert(field.clone(), value.clone());
        }
    }
    JsonValue::Object(merged)
}
