//! # Sync Scheduler
//!
//! Periodic task that walks active sync configurations, and for every due
//! configuration enqueues one incremental job per (source, target) pair
//! that has pending operations and no open job. Job priority is the highest
//! priority among the operations it will drain, so the executor's claim
//! order matches the operations' urgency.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::capture::authoritative_location;
use crate::config::AppConfig;
use crate::error::SyncEngineError;
use crate::models::enums::{SyncDirection, SyncType};
use crate::models::{location, sync_configuration, sync_job};
use crate::repositories::{
    HierarchyRepository, NewSyncJob, OperationLedger, SequenceRepository,
    SyncConfigurationRepository, SyncJobRepository,
};

/// Background scheduler service.
pub struct SyncScheduler {
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub configurations_polled: u64,
    pub configurations_not_due: u64,
    pub jobs_enqueued: u64,
    pub skipped_open_job: u64,
    pub skipped_no_pending: u64,
    pub configurations_with_errors: u64,
}

/// One stream to drain: operations from `source` (any source when `None`) into `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPair {
    pub source_location_id: Option<Uuid>,
    pub target_location_id: Uuid,
}

impl SyncScheduler {
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncEngineError> {
        info!("Starting sync scheduler");
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!(error = ?err, "Scheduler tick failed");
                    }
                    histogram!("sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Sync scheduler stopped");
        Ok(())
    }

    /// One scheduling pass. Returns the jobs created, highest priority first.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<sync_job::Model>, SyncEngineError> {
        let mut stats = TickStats::default();
        let mut created = Vec::new();

        let configurations = SyncConfigurationRepository::new(self.db.as_ref())
            .list_active()
            .await?;

        for configuration in configurations {
            stats.configurations_polled += 1;
            if !is_due(&configuration, now) {
                stats.configurations_not_due += 1;
                continue;
            }
            match self
                .process_configuration(&configuration, now, &mut stats)
                .await
            {
                Ok(mut jobs) => created.append(&mut jobs),
                Err(err) => {
                    stats.configurations_with_errors += 1;
                    error!(
                        error = ?err,
                        configuration_id = %configuration.id,
                        table = %configuration.table_name,
                        "Failed to schedule configuration"
                    );
                }
            }
        }

        created.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        gauge!("sync_scheduler_jobs_enqueued_last_tick").set(stats.jobs_enqueued as f64);
        debug!(
            polled = stats.configurations_polled,
            not_due = stats.configurations_not_due,
            enqueued = stats.jobs_enqueued,
            skipped_open_job = stats.skipped_open_job,
            skipped_no_pending = stats.skipped_no_pending,
            errors = stats.configurations_with_errors,
            "Scheduler tick completed"
        );

        Ok(created)
    }

    async fn process_configuration(
        &self,
        configuration: &sync_configuration::Model,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<Vec<sync_job::Model>, SyncEngineError> {
        let txn = self.db.begin().await?;

        let enabled = HierarchyRepository::new(&txn)
            .enabled_locations(configuration.chain_id)
            .await?;
        let pairs = plan_pairs(configuration, &enabled);

        let jobs_repo = SyncJobRepository::new(&txn);
        let ledger = OperationLedger::new(&txn);
        let sequence = SequenceRepository::new(&txn);
        let mut created = Vec::new();

        for pair in pairs {
            if jobs_repo
                .has_open_job(configuration.id, pair.target_location_id)
                .await?
            {
                stats.skipped_open_job += 1;
                debug!(
                    configuration_id = %configuration.id,
                    target_location_id = %pair.target_location_id,
                    "Skipping target; open job exists"
                );
                continue;
            }

            let Some(pending) = ledger
                .pending_stats(
                    configuration.chain_id,
                    &configuration.table_name,
                    pair.target_location_id,
                    pair.source_location_id,
                )
                .await?
            else {
                stats.skipped_no_pending += 1;
                continue;
            };

            let batch_id = sequence.next_batch_id(configuration.chain_id).await?;
            let job = jobs_repo
                .create(NewSyncJob {
                    configuration_id: configuration.id,
                    chain_id: configuration.chain_id,
                    table_name: configuration.table_name.clone(),
                    source_location_id: pair.source_location_id,
                    target_location_id: pair.target_location_id,
                    sync_type: SyncType::Incremental,
                    priority: pending.max_priority,
                    batch_id,
                    max_retries: self.config.scheduler.default_max_retries,
                })
                .await?;

            stats.jobs_enqueued += 1;
            counter!("sync_scheduler_jobs_scheduled_total").increment(1);
            info!(
                job_id = %job.id,
                configuration_id = %configuration.id,
                table = %configuration.table_name,
                target_location_id = %pair.target_location_id,
                pending = pending.count,
                priority = job.priority,
                "Enqueued incremental sync job"
            );
            created.push(job);
        }

        SyncConfigurationRepository::new(&txn)
            .mark_run(configuration, now.fixed_offset())
            .await?;
        txn.commit().await?;

        Ok(created)
    }
}

/// Due when never run or when a full period has elapsed since the last pass.
pub fn is_due(configuration: &sync_configuration::Model, now: DateTime<Utc>) -> bool {
    match configuration.last_run_at {
        None => true,
        Some(last) => {
            let period = Duration::minutes(i64::from(configuration.frequency_minutes.max(0)));
            last.with_timezone(&Utc) + period <= now
        }
    }
}

/// Streams the direction allows. `enabled` must be ordered most authoritative first.
pub fn plan_pairs(
    configuration: &sync_configuration::Model,
    enabled: &[location::Model],
) -> Vec<SyncPair> {
    let authority = authoritative_location(configuration, enabled).map(|loc| loc.id);
    let mut pairs: Vec<SyncPair> = match configuration.sync_direction {
        SyncDirection::Bidirectional => enabled
            .iter()
            .map(|loc| SyncPair {
                source_location_id: None,
                target_location_id: loc.id,
            })
            .collect(),
        SyncDirection::TopDown => match authority {
            Some(authority) => enabled
                .iter()
                .filter(|loc| loc.id != authority)
                .map(|loc| SyncPair {
                    source_location_id: Some(authority),
                    target_location_id: loc.id,
                })
                .collect(),
            None => Vec::new(),
        },
        SyncDirection::BottomUp => authority
            .map(|authority| SyncPair {
                source_location_id: None,
                target_location_id: authority,
            })
            .into_iter()
            .collect(),
    };

    if let Some(allowed) = configuration.target_ids() {
        pairs.retain(|pair| allowed.contains(&pair.target_location_id));
    }
    pairs
}
