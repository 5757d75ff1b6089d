//! # Sync Service
//!
//! Entry points for operators: out-of-band sync passes, manual conflict
//! resolution, and the read-only query surface. Every call is scoped to the
//! caller's chain.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::capture::authoritative_location;
use crate::error::SyncEngineError;
use crate::models::enums::{ConflictStatus, OperationKind, OperationStatus, SyncType};
use crate::models::sync_configuration::DEFAULT_TIMESTAMP_FIELD;
use crate::models::{location, sync_configuration, sync_conflict, sync_job, sync_operation};
use crate::models::sync_performance_metric;
use crate::priority::{calculate_weighted_priority, effective_table_weight};
use crate::repositories::{
    ConfigurationInput, ConflictRepository, ConflictResolution, HierarchyRepository,
    MetricQuery, MetricRepository, NewLocation, NewOperation, NewSyncJob, OperationLedger,
    SequenceRepository, SyncConfigurationRepository, SyncJobRepository,
};
use crate::resolver::{ConflictImages, ConflictResolver, ResolutionStrategy};
use crate::scheduler::{SyncPair, plan_pairs};

/// An operator's request for an out-of-band sync pass.
#[derive(Debug, Clone)]
pub struct InitiateSync {
    pub chain_id: Uuid,
    pub table_name: String,
    pub sync_type: SyncType,
    pub source_location_id: Option<Uuid>,
    pub target_location_ids: Option<Vec<Uuid>>,
    /// Batch to push; required for delta syncs, ignored otherwise.
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncInitiated {
    pub batch_id: String,
    pub jobs: Vec<sync_job::Model>,
    pub operations_enqueued: u64,
}

/// Jobs and operations issued under one batch.
#[derive(Debug, Clone)]
pub struct BatchStatus {
    pub batch_id: String,
    pub jobs: Vec<sync_job::Model>,
    pub operations: Vec<sync_operation::Model>,
}

#[derive(Clone)]
pub struct SyncService {
    db: Arc<DatabaseConnection>,
    adapters: Arc<AdapterRegistry>,
    default_max_retries: i32,
}

impl SyncService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        adapters: Arc<AdapterRegistry>,
        default_max_retries: i32,
    ) -> Self {
        Self {
            db,
            adapters,
            default_max_retries,
        }
    }

    /// Enqueue jobs for a sync pass and return the batch id they run under.
    #[instrument(skip(self, request), fields(chain_id = %request.chain_id, table = %request.table_name, sync_type = %request.sync_type))]
    pub async fn initiate_sync(
        &self,
        request: InitiateSync,
    ) -> Result<SyncInitiated, SyncEngineError> {
        let db = self.db.as_ref();
        let configuration = SyncConfigurationRepository::new(db)
            .find_active(request.chain_id, &request.table_name)
            .await?
            .ok_or_else(|| SyncEngineError::ConfigurationNotFound {
                chain_id: request.chain_id,
                table: request.table_name.clone(),
            })?;

        let hierarchy = HierarchyRepository::new(db);
        let chain_locations = hierarchy.list_locations(request.chain_id).await?;
        for id in request
            .source_location_id
            .iter()
            .chain(request.target_location_ids.iter().flatten())
        {
            if !chain_locations.iter().any(|loc| loc.id == *id) {
                return Err(SyncEngineError::LocationNotFound(*id));
            }
        }
        let enabled = hierarchy.enabled_locations(request.chain_id).await?;

        let txn = db.begin().await?;
        let batch_id = match (request.sync_type, &request.batch_id) {
            (SyncType::Delta, Some(batch_id)) => batch_id.clone(),
            (SyncType::Delta, None) => {
                return Err(SyncEngineError::Validation(
                    "delta sync requires a batch_id".to_string(),
                ));
            }
            _ => {
                SequenceRepository::new(&txn)
                    .next_batch_id(request.chain_id)
                    .await?
            }
        };

        let (pairs, operations_enqueued) = if request.sync_type == SyncType::Full {
            let source = match request.source_location_id {
                Some(id) => enabled.iter().find(|loc| loc.id == id),
                None => authoritative_location(&configuration, &enabled),
            }
            .ok_or_else(|| {
                SyncEngineError::Validation(
                    "full sync requires an enabled source location".to_string(),
                )
            })?;
            let pairs = restrict(
                enabled
                    .iter()
                    .filter(|loc| loc.id != source.id)
                    .map(|loc| SyncPair {
                        source_location_id: Some(source.id),
                        target_location_id: loc.id,
                    })
                    .collect(),
                &configuration,
                request.target_location_ids.as_deref(),
            );
            let enqueued = self
                .enqueue_snapshot(&txn, &configuration, source, &enabled, &pairs, &batch_id)
                .await?;
            (pairs, enqueued)
        } else {
            let mut pairs = plan_pairs(&configuration, &enabled);
            if let Some(source) = request.source_location_id {
                pairs.retain(|pair| pair.target_location_id != source);
                for pair in &mut pairs {
                    pair.source_location_id = Some(source);
                }
            }
            (
                restrict(pairs, &configuration, request.target_location_ids.as_deref()),
                0,
            )
        };

        let ledger = OperationLedger::new(&txn);
        let batch_operations = if request.sync_type == SyncType::Incremental {
            Vec::new()
        } else {
            ledger.find_by_batch(request.chain_id, &batch_id).await?
        };

        let jobs_repo = SyncJobRepository::new(&txn);
        let mut jobs = Vec::new();
        for pair in pairs {
            let priority = if request.sync_type == SyncType::Incremental {
                ledger
                    .pending_stats(
                        request.chain_id,
                        &configuration.table_name,
                        pair.target_location_id,
                        pair.source_location_id,
                    )
                    .await?
                    .map(|stats| stats.max_priority)
            } else {
                batch_operations
                    .iter()
                    .filter(|op| op.target_location_id == pair.target_location_id)
                    .filter(|op| {
                        pair.source_location_id
                            .is_none_or(|source| op.source_location_id == source)
                    })
                    .map(|op| op.priority)
                    .max()
            };
            let Some(priority) = priority else {
                continue;
            };

            jobs.push(
                jobs_repo
                    .create(NewSyncJob {
                        configuration_id: configuration.id,
                        chain_id: configuration.chain_id,
                        table_name: configuration.table_name.clone(),
                        source_location_id: pair.source_location_id,
                        target_location_id: pair.target_location_id,
                        sync_type: request.sync_type,
                        priority,
                        batch_id: batch_id.clone(),
                        max_retries: self.default_max_retries,
                    })
                    .await?,
            );
        }
        txn.commit().await?;

        info!(
            batch_id = %batch_id,
            jobs = jobs.len(),
            operations_enqueued,
            "Sync initiated"
        );
        Ok(SyncInitiated {
            batch_id,
            jobs,
            operations_enqueued,
        })
    }

    /// Snapshot the source table and enqueue one insert per record and target.
    async fn enqueue_snapshot<C: sea_orm::ConnectionTrait>(
        &self,
        db: &C,
        configuration: &sync_configuration::Model,
        source: &location::Model,
        enabled: &[location::Model],
        pairs: &[SyncPair],
        batch_id: &str,
    ) -> Result<u64, SyncEngineError> {
        let records = self
            .adapters
            .resolve(source.id, &configuration.table_name)?
            .scan()
            .await?;
        let rules = configuration.rules();
        let table_weight =
            effective_table_weight(&configuration.table_name, configuration.priority_weight);

        let mut operations = Vec::with_capacity(records.len() * pairs.len());
        for pair in pairs {
            let target_priority = enabled
                .iter()
                .find(|loc| loc.id == pair.target_location_id)
                .map(|loc| loc.sync_priority)
                .unwrap_or_default();
            for (record_id, image) in &records {
                operations.push(NewOperation {
                    chain_id: configuration.chain_id,
                    source_location_id: source.id,
                    target_location_id: pair.target_location_id,
                    table_name: configuration.table_name.clone(),
                    operation_type: OperationKind::Insert,
                    record_id: record_id.clone(),
                    before_data: None,
                    after_data: Some(rules.filter_image(image)),
                    batch_id: batch_id.to_string(),
                    priority: calculate_weighted_priority(
                        table_weight,
                        OperationKind::Insert,
                        target_priority,
                    ),
                });
            }
        }
        Ok(OperationLedger::new(db).append(operations).await?)
    }

    /// Resolve a pending conflict on behalf of `actor`. An explicit image
    /// wins; otherwise the named automatic strategy computes one.
    #[instrument(skip(self, resolved_image), fields(chain_id = %chain_id, conflict_id = %conflict_id, strategy = %strategy))]
    pub async fn resolve_conflict(
        &self,
        chain_id: Uuid,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        resolved_image: Option<JsonValue>,
        actor: &str,
    ) -> Result<sync_conflict::Model, SyncEngineError> {
        let db = self.db.as_ref();
        let conflicts = ConflictRepository::new(db);
        let conflict = conflicts
            .find_by_id(conflict_id)
            .await?
            .ok_or(SyncEngineError::ConflictNotFound(conflict_id))?;
        if conflict.chain_id != chain_id {
            return Err(SyncEngineError::Forbidden(
                "conflict belongs to another chain".to_string(),
            ));
        }
        if conflict.status == ConflictStatus::Resolved {
            return Err(SyncEngineError::ConflictAlreadyResolved(conflict_id));
        }

        let operation = OperationLedger::new(db)
            .find_by_id(conflict.sync_operation_id)
            .await?
            .ok_or_else(|| {
                SyncEngineError::Internal(format!(
                    "operation {} of conflict {conflict_id} is missing",
                    conflict.sync_operation_id
                ))
            })?;
        if operation.status != OperationStatus::Conflict {
            return Err(SyncEngineError::OperationNotAwaitingReview(operation.id));
        }

        let image = match resolved_image {
            Some(image) => image,
            None => {
                let timestamp_field = SyncConfigurationRepository::new(db)
                    .find_active(chain_id, &conflict.table_name)
                    .await?
                    .map(|config| config.rules().timestamp_field().to_string())
                    .unwrap_or_else(|| DEFAULT_TIMESTAMP_FIELD.to_string());
                let images = ConflictImages {
                    source: &conflict.source_data,
                    target: &conflict.target_data,
                    base: conflict.base_data.as_ref(),
                    timestamp_field: &timestamp_field,
                };
                ConflictResolver.resolve(strategy, &images).ok_or_else(|| {
                    SyncEngineError::Validation(
                        "manual resolution requires resolved_data".to_string(),
                    )
                })?
            }
        };

        self.adapters
            .resolve(operation.target_location_id, &operation.table_name)?
            .apply_image(&operation.record_id, Some(&image))
            .await?;

        let txn = db.begin().await?;
        let resolved = ConflictRepository::new(&txn)
            .mark_resolved(
                conflict_id,
                ConflictResolution {
                    resolution_strategy: strategy.as_str().to_string(),
                    resolved_data: image.clone(),
                    resolved_by: actor.to_string(),
                    auto_resolved: false,
                },
                Utc::now().fixed_offset(),
            )
            .await?;
        if !resolved {
            return Err(SyncEngineError::ConflictAlreadyResolved(conflict_id));
        }
        let completed = OperationLedger::new(&txn)
            .complete_resolved_conflict(operation.id, strategy.as_str(), image)
            .await?;
        if !completed {
            // Dropping the transaction rolls back the conflict update.
            return Err(SyncEngineError::OperationNotAwaitingReview(operation.id));
        }
        txn.commit().await?;

        info!(actor, operation_id = %operation.id, "Conflict resolved manually");
        ConflictRepository::new(db)
            .find_by_id(conflict_id)
            .await?
            .ok_or(SyncEngineError::ConflictNotFound(conflict_id))
    }

    pub async fn list_pending_conflicts(
        &self,
        chain_id: Uuid,
        limit: u64,
    ) -> Result<Vec<sync_conflict::Model>, SyncEngineError> {
        Ok(ConflictRepository::new(self.db.as_ref())
            .list_pending(chain_id, limit)
            .await?)
    }

    pub async fn list_metrics(
        &self,
        chain_id: Uuid,
        query: &MetricQuery,
    ) -> Result<Vec<sync_performance_metric::Model>, SyncEngineError> {
        Ok(MetricRepository::new(self.db.as_ref())
            .list(chain_id, query)
            .await?)
    }

    pub async fn batch_status(
        &self,
        chain_id: Uuid,
        batch_id: &str,
    ) -> Result<BatchStatus, SyncEngineError> {
        let db = self.db.as_ref();
        let jobs = SyncJobRepository::new(db)
            .find_by_batch(chain_id, batch_id)
            .await?;
        let operations = OperationLedger::new(db)
            .find_by_batch(chain_id, batch_id)
            .await?;
        if jobs.is_empty() && operations.is_empty() {
            return Err(SyncEngineError::BatchNotFound(batch_id.to_string()));
        }
        Ok(BatchStatus {
            batch_id: batch_id.to_string(),
            jobs,
            operations,
        })
    }

    /// Create or replace a chain's configuration for one table.
    pub async fn upsert_configuration(
        &self,
        input: ConfigurationInput,
    ) -> Result<sync_configuration::Model, SyncEngineError> {
        let hierarchy = HierarchyRepository::new(self.db.as_ref());
        if hierarchy.find_chain(input.chain_id).await?.is_none() {
            return Err(SyncEngineError::Validation(format!(
                "chain {} does not exist",
                input.chain_id
            )));
        }
        if let Some(source) = input.source_location_id {
            match hierarchy.find_location(source).await? {
                Some(loc) if loc.chain_id == input.chain_id => {}
                _ => return Err(SyncEngineError::LocationNotFound(source)),
            }
        }
        SyncConfigurationRepository::new(self.db.as_ref())
            .upsert(input)
            .await
    }

    pub async fn list_configurations(
        &self,
        chain_id: Uuid,
    ) -> Result<Vec<sync_configuration::Model>, SyncEngineError> {
        SyncConfigurationRepository::new(self.db.as_ref())
            .list_for_chain(chain_id)
            .await
    }

    pub async fn create_location(
        &self,
        location: NewLocation,
    ) -> Result<location::Model, SyncEngineError> {
        HierarchyRepository::new(self.db.as_ref())
            .create_location(location)
            .await
    }

    pub async fn list_locations(
        &self,
        chain_id: Uuid,
    ) -> Result<Vec<location::Model>, SyncEngineError> {
        HierarchyRepository::new(self.db.as_ref())
            .list_locations(chain_id)
            .await
    }
}

/// Apply the request's and the configuration's target whitelists.
fn restrict(
    mut pairs: Vec<SyncPair>,
    configuration: &sync_configuration::Model,
    requested: Option<&[Uuid]>,
) -> Vec<SyncPair> {
    if let Some(allowed) = configuration.target_ids() {
        pairs.retain(|pair| allowed.contains(&pair.target_location_id));
    }
    if let Some(requested) = requested {
        pairs.retain(|pair| requested.contains(&pair.target_location_id));
    }
    pairs
}
