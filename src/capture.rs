//! # Change Capture
//!
//! Turns a local mutation at one location into pending ledger operations,
//! one per target location allowed by the table's sync direction. A
//! [`ChangeCapture`] is bound to the location whose store it observes.
//!
//! Capture never blocks the local write: with no active configuration the
//! mutation is simply not propagated.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::SyncEngineError;
use crate::models::enums::{OperationKind, SyncDirection};
use crate::models::{location, sync_configuration};
use crate::priority::{calculate_weighted_priority, effective_table_weight};
use crate::repositories::{
    HierarchyRepository, NewOperation, OperationLedger, SequenceRepository,
    SyncConfigurationRepository,
};

/// A committed local write, as reported by a location's store.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub table: String,
    pub kind: OperationKind,
    pub record_id: String,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    /// Store-supplied batch; a fresh one is allocated when absent.
    pub batch_id: Option<String>,
}

impl MutationEvent {
    pub fn insert(table: &str, record_id: &str, after: JsonValue) -> Self {
        Self {
            table: table.to_string(),
            kind: OperationKind::Insert,
            record_id: record_id.to_string(),
            before: None,
            after: Some(after),
            batch_id: None,
        }
    }

    pub fn update(table: &str, record_id: &str, before: JsonValue, after: JsonValue) -> Self {
        Self {
            table: table.to_string(),
            kind: OperationKind::Update,
            record_id: record_id.to_string(),
            before: Some(before),
            after: Some(after),
            batch_id: None,
        }
    }

    pub fn delete(table: &str, record_id: &str, before: Option<JsonValue>) -> Self {
        Self {
            table: table.to_string(),
            kind: OperationKind::Delete,
            record_id: record_id.to_string(),
            before,
            after: None,
            batch_id: None,
        }
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoConfiguration,
    LocationDisabled,
    /// The direction does not let this location emit changes for the table.
    NotAnEmitter,
    NoTargets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured {
        batch_id: String,
        targets: Vec<Uuid>,
        /// Rows actually written; re-captures of the same batch add none.
        appended: u64,
    },
    Dropped(DropReason),
}

#[async_trait]
pub trait MutationObserver: Send + Sync {
    async fn on_mutation(&self, event: MutationEvent) -> Result<CaptureOutcome, SyncEngineError>;
}

/// Enabled location holding authority for a configuration: the configured
/// source, else the most authoritative one. `enabled` must be ordered by
/// `(sync_priority, created_at)`.
pub fn authoritative_location<'a>(
    config: &sync_configuration::Model,
    enabled: &'a [location::Model],
) -> Option<&'a location::Model> {
    match config.source_location_id {
        Some(source) => enabled.iter().find(|loc| loc.id == source),
        None => enabled.first(),
    }
}

/// Locations a change emitted at `source` must reach.
pub fn fan_out_targets<'a>(
    config: &sync_configuration::Model,
    source: Uuid,
    enabled: &'a [location::Model],
) -> Result<Vec<&'a location::Model>, DropReason> {
    let authority = authoritative_location(config, enabled).map(|loc| loc.id);
    let mut targets: Vec<&location::Model> = match config.sync_direction {
        SyncDirection::Bidirectional => enabled.iter().filter(|loc| loc.id != source).collect(),
        SyncDirection::TopDown => {
            if authority != Some(source) {
                return Err(DropReason::NotAnEmitter);
            }
            enabled.iter().filter(|loc| loc.id != source).collect()
        }
        SyncDirection::BottomUp => {
            if authority.is_none() || authority == Some(source) {
                return Err(DropReason::NotAnEmitter);
            }
            enabled
                .iter()
                .filter(|loc| Some(loc.id) == authority)
                .collect()
        }
    };

    if let Some(allowed) = config.target_ids() {
        targets.retain(|loc| allowed.contains(&loc.id));
    }
    if targets.is_empty() {
        return Err(DropReason::NoTargets);
    }
    Ok(targets)
}

/// Capture bound to one location's store.
#[derive(Clone)]
pub struct ChangeCapture {
    db: Arc<DatabaseConnection>,
    location_id: Uuid,
}

impl ChangeCapture {
    pub fn new(db: Arc<DatabaseConnection>, location_id: Uuid) -> Self {
        Self { db, location_id }
    }

    pub fn location_id(&self) -> Uuid {
        self.location_id
    }

    fn validate(event: &MutationEvent) -> Result<(), SyncEngineError> {
        if event.table.trim().is_empty() || event.record_id.trim().is_empty() {
            return Err(SyncEngineError::Validation(
                "table and record id are required".to_string(),
            ));
        }
        if event.kind != OperationKind::Delete && event.after.is_none() {
            return Err(SyncEngineError::Validation(format!(
                "{} of record '{}' carries no after-image",
                event.kind, event.record_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MutationObserver for ChangeCapture {
    #[instrument(skip_all, fields(location_id = %self.location_id, table = %event.table, record_id = %event.record_id, kind = %event.kind))]
    async fn on_mutation(&self, event: MutationEvent) -> Result<CaptureOutcome, SyncEngineError> {
        Self::validate(&event)?;
        let db = self.db.as_ref();

        let hierarchy = HierarchyRepository::new(db);
        let source = hierarchy
            .find_location(self.location_id)
            .await?
            .ok_or(SyncEngineError::LocationNotFound(self.location_id))?;
        if !source.sync_enabled {
            debug!("Location has sync disabled; mutation not propagated");
            return Ok(CaptureOutcome::Dropped(DropReason::LocationDisabled));
        }

        let Some(config) = SyncConfigurationRepository::new(db)
            .find_active(source.chain_id, &event.table)
            .await?
        else {
            debug!("No active sync configuration; mutation not propagated");
            return Ok(CaptureOutcome::Dropped(DropReason::NoConfiguration));
        };

        let enabled = hierarchy.enabled_locations(source.chain_id).await?;
        let targets = match fan_out_targets(&config, source.id, &enabled) {
            Ok(targets) => targets,
            Err(reason) => {
                debug!(?reason, direction = %config.sync_direction, "Mutation not propagated");
                return Ok(CaptureOutcome::Dropped(reason));
            }
        };

        let rules = config.rules();
        let before = event.before.as_ref().map(|image| rules.filter_image(image));
        let after = event.after.as_ref().map(|image| rules.filter_image(image));
        let table_weight = effective_table_weight(&config.table_name, config.priority_weight);

        let txn = db.begin().await?;
        let batch_id = match event.batch_id {
            Some(batch_id) => batch_id,
            None => {
                SequenceRepository::new(&txn)
                    .next_batch_id(source.chain_id)
                    .await?
            }
        };

        let operations = targets
            .iter()
            .map(|target| NewOperation {
                chain_id: source.chain_id,
                source_location_id: source.id,
                target_location_id: target.id,
                table_name: config.table_name.clone(),
                operation_type: event.kind,
                record_id: event.record_id.clone(),
                before_data: before.clone(),
                after_data: after.clone(),
                batch_id: batch_id.clone(),
                priority: calculate_weighted_priority(
                    table_weight,
                    event.kind,
                    target.sync_priority,
                ),
            })
            .collect();
        let appended = OperationLedger::new(&txn).append(operations).await?;
        txn.commit().await?;

        counter!("sync_capture_operations_total").increment(appended);
        info!(
            batch_id = %batch_id,
            targets = targets.len(),
            appended,
            "Mutation captured"
        );

        Ok(CaptureOutcome::Captured {
            batch_id,
            targets: targets.iter().map(|loc| loc.id).collect(),
            appended,
        })
    }
}
